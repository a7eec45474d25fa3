pub mod payload;
pub mod publisher;

pub use payload::{MessageBody, PayloadCodec};
pub use publisher::{ChannelConnector, MqttChannel, MqttConnector, PublishChannel};
