//! `provigate-requests` — the provisioning-request aggregate.
//!
//! Lifecycle: a user submits a request for a resource, an admin approves or
//! rejects it (separation of duties), an approved request is provisioned by
//! the system and ends up ready or failed. Rejected, cancelled, ready and
//! failed are terminal.

pub mod request;

pub use request::{
    ApproveRequest, CancelRequest, ProvisioningFailed, ProvisioningRequest, ProvisioningStarted,
    ProvisioningSucceeded, RecordProvisioningOutcome, RejectRequest, RequestApproved,
    RequestCancelled, RequestCommand, RequestEvent, RequestId, RequestRejected, RequestStatus,
    RequestSubmitted, StartProvisioning, SubmitRequest, MSG_PROVISIONING_COMPLETED,
    MSG_REQUEST_DECIDED, REQUEST_AGGREGATE_TYPE,
};
