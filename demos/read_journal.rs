#[cfg(windows)]
fn main() -> Result<(), change_journal::JournalError> {
    use change_journal::journal::{DeviceJournal, JournalClient, ReadOptions};
    use change_journal::volume::{self, AccessMode, VolumePath};

    let mode = AccessMode::detect()?;
    let path = VolumePath::from_drive_letter('C')?;
    let handle = volume::open_volume(&path, mode)?;

    let mut client = JournalClient::new(DeviceJournal::new(&handle, mode))?;
    let descriptor = *client.descriptor();
    println!("journal id {:#x}, cursors {}..{}", descriptor.journal_id, descriptor.first_usn, descriptor.next_usn);

    let mut read = client.read(ReadOptions {
        start_usn: descriptor.first_usn,
        end_usn: Some(descriptor.next_usn),
        ..Default::default()
    });
    for record in read.by_ref().take(100) {
        println!(
            "usn={}, reason={}, name={}",
            record.usn,
            record.reason_to_string(),
            record.file_name
        );
    }
    println!("outcome: {:?}", read.finish());

    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("this example needs a Windows volume with a change journal");
}
