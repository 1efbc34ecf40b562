//! Audio pre-encoding, caching, and RTP emission.

pub mod cache;
pub mod encoder;
pub mod rtp;

pub use cache::{AudioCache, CacheStats};
pub use encoder::{encode_wav_file, EncodedAudio};
pub use rtp::{RtpHeader, RtpTransport, UdpEndpointPool};
