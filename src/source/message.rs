use crate::error::DecodeError;
use crate::processor::decode_rgb;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use tokio_tungstenite::tungstenite::Message;

/// What an inbound WebSocket message means for the frame source
#[derive(Debug)]
pub enum Inbound {
    /// Encoded still image
    Image(Vec<u8>),
    /// Free-text status from the device
    Status(String),
    /// Payload that claimed to be an image but could not be unpacked
    Invalid(DecodeError),
    /// Control frames and unrecognised JSON
    Ignored,
    /// Peer closed the connection
    Closed,
}

/// Classify a message: binary is an image; text is JSON carrying `image`
/// (base64) or `status`; text that is not JSON is tried as raw image bytes.
pub fn classify(message: Message) -> Inbound {
    match message {
        Message::Binary(bytes) => Inbound::Image(bytes),
        Message::Text(text) => classify_text(text),
        Message::Close(_) => Inbound::Closed,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Ignored,
    }
}

fn classify_text(text: String) -> Inbound {
    let value = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => value,
        Err(_) => return Inbound::Image(text.into_bytes()),
    };

    if let Some(image) = value.get("image") {
        return match image.as_str() {
            Some(encoded) => match STANDARD.decode(encoded.trim()) {
                Ok(bytes) => Inbound::Image(bytes),
                Err(e) => Inbound::Invalid(DecodeError::Base64 {
                    details: e.to_string(),
                }),
            },
            None => Inbound::Invalid(DecodeError::Base64 {
                details: "`image` field is not a string".to_string(),
            }),
        };
    }

    match value.get("status") {
        Some(serde_json::Value::String(status)) => Inbound::Status(status.clone()),
        Some(other) => Inbound::Status(other.to_string()),
        None => Inbound::Ignored,
    }
}

/// Decode image bytes and reject implausible dimensions (zero, or at or
/// above `max_dimension`)
pub fn decode_frame(bytes: &[u8], max_dimension: u32) -> Result<RgbImage, DecodeError> {
    let image = decode_rgb(bytes)?;
    let (width, height) = image.dimensions();

    if width == 0 || height == 0 || width >= max_dimension || height >= max_dimension {
        return Err(DecodeError::Dimensions { width, height });
    }

    Ok(image)
}
