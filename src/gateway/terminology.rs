//! TerminologyGateway - the assembled clients behind one handle

use crate::cache::{Sweeper, TtlCache};
use crate::upstream::{
    IcdClient, LoincClient, MeshClient, RateLimiter, RxNormClient, SnomedClient, UpstreamId,
};
use crate::{MimirError, Result};

/// All five terminology clients sharing one cache.
///
/// Built by [`MimirBuilder`](super::MimirBuilder). Operations are invoked
/// by name through [`invoke`](Self::invoke), or directly on the clients.
pub struct TerminologyGateway {
    cache: TtlCache,
    sweeper: Option<Sweeper>,
    icd: std::result::Result<IcdClient, MimirError>,
    icd_limiter: RateLimiter,
    loinc: LoincClient,
    rxnorm: RxNormClient,
    mesh: MeshClient,
    snomed: SnomedClient,
}

impl TerminologyGateway {
    pub(crate) fn new(
        cache: TtlCache,
        sweeper: Option<Sweeper>,
        icd: std::result::Result<IcdClient, MimirError>,
        icd_limiter: RateLimiter,
        loinc: LoincClient,
        rxnorm: RxNormClient,
        mesh: MeshClient,
        snomed: SnomedClient,
    ) -> Self {
        Self {
            cache,
            sweeper,
            icd,
            icd_limiter,
            loinc,
            rxnorm,
            mesh,
            snomed,
        }
    }

    /// The ICD-11 client, or the configuration error that disabled it.
    pub fn icd(&self) -> Result<&IcdClient> {
        self.icd.as_ref().map_err(Clone::clone)
    }

    pub fn loinc(&self) -> &LoincClient {
        &self.loinc
    }

    pub fn rxnorm(&self) -> &RxNormClient {
        &self.rxnorm
    }

    pub fn mesh(&self) -> &MeshClient {
        &self.mesh
    }

    pub fn snomed(&self) -> &SnomedClient {
        &self.snomed
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn limiter(&self, upstream: UpstreamId) -> &RateLimiter {
        match upstream {
            UpstreamId::Icd => &self.icd_limiter,
            UpstreamId::Loinc => self.loinc.upstream().limiter(),
            UpstreamId::RxNorm => self.rxnorm.upstream().limiter(),
            UpstreamId::Mesh => self.mesh.upstream().limiter(),
            UpstreamId::Snomed => self.snomed.upstream().limiter(),
        }
    }

    /// Refill every limiter and release queued callers.
    pub fn reset_limiters(&self) {
        for id in UpstreamId::ALL {
            self.limiter(id).reset();
        }
    }

    /// Whether the ICD-11 client was configured with credentials.
    /// Whether expired cache entries are swept in the background.
    pub fn sweeping(&self) -> bool {
        self.sweeper.is_some()
    }

    pub fn icd_enabled(&self) -> bool {
        self.icd.is_ok()
    }
}
