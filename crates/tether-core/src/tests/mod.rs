//! Shared test doubles and behavioural tests for the dispatch engine.

mod behaviour;

use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use serde_json::Value;

use crate::error::RemoteError;
use crate::protocol::{CallRequest, InstanceId, MemberDescriptor, MemberIndex};
use crate::queue::AckQueue;
use crate::remote::{EventCall, RemoteStub};

mock! {
    pub Remote {}
    impl RemoteStub for Remote {
        fn ready(&self, timeout: Duration) -> Result<(), RemoteError>;
        fn create(&self, class_id: &str) -> Result<InstanceId, RemoteError>;
        fn destroy(&self, instance: &InstanceId) -> Result<bool, RemoteError>;
        fn describe(&self, instance: &InstanceId) -> Result<Vec<MemberDescriptor>, RemoteError>;
        fn call(&self, request: CallRequest) -> Result<Value, RemoteError>;
        fn connect_event(
            &self,
            instance: &InstanceId,
            index: MemberIndex,
        ) -> Result<bool, RemoteError>;
        fn disconnect_event(
            &self,
            instance: &InstanceId,
            index: MemberIndex,
        ) -> Result<bool, RemoteError>;
        fn handle_event(&self, acks: Arc<AckQueue>) -> Result<EventCall, RemoteError>;
    }
}
