//! Radio backend on top of `btleplug` (BlueZ, CoreBluetooth, WinRT).

mod central_manager;

pub use central_manager::BtleplugCentral;
