use crate::error::CodecError;
use crate::message::Message;
use crate::transport::TransportMessage;

/// Encodes messages into their persisted/wire content form and back.
///
/// Passed explicitly into the publisher, dispatcher, and executor at
/// construction — there is no global serializer registry.
pub trait PayloadCodec: Send + Sync {
    /// Serialize a message into the envelope's cached content string.
    fn encode(&self, message: &Message) -> Result<String, CodecError>;

    /// Deserialize an envelope's cached content back into a message.
    fn decode(&self, content: &str) -> Result<Message, CodecError>;
}

/// Default codec: the message as a single JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, content: &str) -> Result<Message, CodecError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Build the wire message for a decoded origin message. The body is the
/// payload serialized on its own so brokers see opaque bytes, not the
/// envelope framing.
pub fn to_transport(message: &Message) -> Result<TransportMessage, CodecError> {
    Ok(TransportMessage {
        headers: message.headers.clone(),
        body: serde_json::to_vec(&message.body)?,
    })
}

/// Rebuild a message from a wire message received off the broker.
pub fn from_transport(wire: &TransportMessage) -> Result<Message, CodecError> {
    Ok(Message {
        headers: wire.headers.clone(),
        body: serde_json::from_slice(&wire.body)?,
    })
}
