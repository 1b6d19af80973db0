#[cfg(windows)]
fn main() -> Result<(), change_journal::JournalError> {
    use std::path::PathBuf;

    use change_journal::identity;

    let target = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows\notepad.exe"));

    let identity = identity::resolve_path(&target)?;
    println!("volume serial: {}", identity.volume_serial);
    println!("file id:       {}", identity.fid);
    println!("usn:           {}", identity.record.usn);
    println!("last reason:   {}", identity.record.reason_to_string());

    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("this example needs a Windows file handle");
}
