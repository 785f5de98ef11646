pub mod api_error;
pub mod event_action;
pub mod inspector;
pub mod reaction_record;
pub mod reactor;
pub mod source;
pub mod webhook_delivery;
pub mod webhooks;

#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use event_action::EventAction;
#[allow(unused_imports)]
pub use inspector::ListDeliveriesResponse;
#[allow(unused_imports)]
pub use reaction_record::{ReactionRecord, ReactionStatus};
#[allow(unused_imports)]
pub use reactor::{ReactResponse, ReactionOutcome};
#[allow(unused_imports)]
pub use source::Source;
#[allow(unused_imports)]
pub use webhook_delivery::{DeliveryStatus, WebhookDelivery};
#[allow(unused_imports)]
pub use webhooks::{EmailPushAck, WebhookAck};
