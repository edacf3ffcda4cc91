pub mod gateway;

pub use gateway::{
    is_expo_push_token, DeliveryStatus, ExpoPushGateway, PushErrorCode, PushMessage, PushReceipt,
    PushTicket, PushTransport,
};
