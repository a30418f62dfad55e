mod decode;
mod wav;

pub use decode::{AudioBuffer, DecodeError, decode_bytes, decode_file, probe_duration};
pub use wav::write_wav;
