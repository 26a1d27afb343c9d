use vergen_gitcl::{Emitter, Gitcl};

// Embeds the git revision for `version::version_string()` and the HTTP user agent.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gitcl = Gitcl::builder().sha(true).dirty(true).build();
    Emitter::default().add_instructions(&gitcl)?.emit()?;
    Ok(())
}
