pub mod catalogue;
pub mod reader;
pub mod reading;

pub use catalogue::{RegisterCatalogue, RegisterModule, RegisterSpec};
pub use reader::DeviceReader;
pub use reading::Reading;
