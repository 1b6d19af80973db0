#[cfg(windows)]
fn main() -> Result<(), change_journal::JournalError> {
    use change_journal::registry::VolumeRegistry;
    use change_journal::volume::AccessMode;

    let mode = AccessMode::detect()?;
    let registry = VolumeRegistry::discover(mode)?;

    for (serial, path) in registry.iter() {
        println!("{serial} -> {path}");
    }
    println!("{} resolvable volume(s)", registry.len());

    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("this example needs Windows volume enumeration");
}
