use vergen_gitcl::{CargoBuilder, Emitter, GitclBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let gitcl = GitclBuilder::all_git()?;
	let cargo = CargoBuilder::all_cargo()?;

	Emitter::default().add_instructions(&gitcl)?.add_instructions(&cargo)?.emit()?;

	Ok(())
}
