use std::io;
use std::io::ErrorKind;
use std::path::Path;

use super::{DemuxPort, DeviceProvider, FrontendPort};

const UNSUPPORTED_MSG: &str = "DVB chardev access is only supported on Linux";

/// Placeholder provider for platforms without the DVB chardev API.
pub struct CharDevices;

impl DeviceProvider for CharDevices {
    fn open_frontend(&self, _path: &Path) -> io::Result<Box<dyn FrontendPort>> {
        Err(io::Error::new(ErrorKind::Unsupported, UNSUPPORTED_MSG))
    }

    fn open_demux(&self, _path: &Path) -> io::Result<Box<dyn DemuxPort>> {
        Err(io::Error::new(ErrorKind::Unsupported, UNSUPPORTED_MSG))
    }
}
