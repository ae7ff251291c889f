pub mod upload;
pub mod voice;

pub use self::upload::ImageUpload;
pub use self::voice::{AudioClip, MicrophoneRecorder, UtteranceRecorder};
