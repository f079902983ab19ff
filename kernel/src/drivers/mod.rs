//! Device drivers module: the PIO ATA disk driver (C13).

pub mod ata;

pub fn init() {
    log::info!("drivers: probing legacy ATA positions");
    ata::init();
}
