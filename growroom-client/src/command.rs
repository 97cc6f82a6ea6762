use std::collections::VecDeque;
use std::sync::Arc;

use growroom_api::events;
use growroom_api::message::{CommandExtra, CommandResponse, DeviceCommand};
use growroom_api::{ControlType, Envelope, Sector};
use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::Transport;
use crate::dispatcher::{Dispatcher, Subscription};

/// Acknowledgement listeners kept waiting at once.
pub const MAX_PENDING_ACKS: usize = 64;

/// The response event answering one kind of submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseChannel {
    /// `device_command`, answered by `command_response`
    Command,
    /// `control_type_change`, answered by `type_change_response`
    TypeChange,
}

impl ResponseChannel {
    pub const ALL: [ResponseChannel; 2] = [ResponseChannel::Command, ResponseChannel::TypeChange];

    pub fn request_event(&self) -> &'static str {
        match self {
            ResponseChannel::Command => events::DEVICE_COMMAND,
            ResponseChannel::TypeChange => events::CONTROL_TYPE_CHANGE,
        }
    }

    pub fn response_event(&self) -> &'static str {
        match self {
            ResponseChannel::Command => events::COMMAND_RESPONSE,
            ResponseChannel::TypeChange => events::TYPE_CHANGE_RESPONSE,
        }
    }
}

/// Sector and device a response names, when the backend echoes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Echo {
    pub sector: Option<Sector>,
    pub device: Option<String>,
}

impl Echo {
    pub fn from_response(data: &Value) -> Self {
        match serde_json::from_value::<CommandResponse>(data.clone()) {
            Ok(response) => Self {
                sector: response.sector(),
                device: response.device().map(str::to_string),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sector.is_none() && self.device.is_none()
    }

    /// Whether this response may answer a command for `device` in `sector`.
    pub fn matches(&self, sector: Sector, device: &str) -> bool {
        self.sector.is_none_or(|echoed| echoed == sector)
            && self.device.as_deref().is_none_or(|echoed| echoed == device)
    }
}

/// Outcome reported by the backend for one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Success(Value),
    Error(String),
}

impl Ack {
    /// Interprets a `command_response` or `type_change_response` payload.
    pub fn from_response(data: &Value) -> Self {
        match serde_json::from_value::<CommandResponse>(data.clone()) {
            Ok(response) => match response.error_message() {
                Some(message) => Ack::Error(message),
                None => Ack::Success(data.clone()),
            },
            Err(e) => Ack::Error(format!("malformed response: {e}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Ack::Success(_))
    }
}

/// Builds outbound commands and submits them while connected.
///
/// Every submission returns `true` only when the transport was connected at
/// call time and accepted the frame. A disconnected call emits nothing and
/// asks the transport to reconnect once.
pub struct CommandEncoder {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    acks: Mutex<VecDeque<Subscription>>,
}

impl CommandEncoder {
    pub fn new(transport: Arc<dyn Transport>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
            acks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Returns whether the transport is connected, asking it to reconnect
    /// when it is not.
    pub fn ensure_connected(&self) -> bool {
        if self.transport.is_connected() {
            return true;
        }

        tracing::error!("Not connected to server, reconnecting");
        self.transport.reconnect();
        false
    }

    pub fn send_device_command(
        &self,
        sector: Sector,
        device: &str,
        status: bool,
        control_type: ControlType,
        extra: CommandExtra,
    ) -> bool {
        let command = device_command(sector, device, status, control_type, extra);
        self.submit(ResponseChannel::Command.request_event(), &command)
    }

    /// Like [`CommandEncoder::send_device_command`], logging and forwarding
    /// the first `command_response` that may answer it.
    pub fn send_device_command_with_ack<F>(
        &self,
        sector: Sector,
        device: &str,
        status: bool,
        control_type: ControlType,
        extra: CommandExtra,
        on_ack: F,
    ) -> bool
    where
        F: FnOnce(Ack) + Send + 'static,
    {
        let command = device_command(sector, device, status, control_type, extra);
        self.submit_with_ack(ResponseChannel::Command, &command, on_ack)
    }

    pub fn change_control_type(
        &self,
        sector: Sector,
        device: &str,
        control_type: ControlType,
        status: bool,
        extra: CommandExtra,
    ) -> bool {
        let command = device_command(sector, device, status, control_type, extra);
        self.submit(ResponseChannel::TypeChange.request_event(), &command)
    }

    pub fn change_control_type_with_ack<F>(
        &self,
        sector: Sector,
        device: &str,
        control_type: ControlType,
        status: bool,
        extra: CommandExtra,
        on_ack: F,
    ) -> bool
    where
        F: FnOnce(Ack) + Send + 'static,
    {
        let command = device_command(sector, device, status, control_type, extra);
        self.submit_with_ack(ResponseChannel::TypeChange, &command, on_ack)
    }

    /// Emits an arbitrary event.
    pub fn send_message(&self, event: &str, payload: Value) -> bool {
        self.emit(Envelope::new(event, payload))
    }

    fn submit(&self, event: &str, command: &DeviceCommand) -> bool {
        match serde_json::to_value(command) {
            Ok(payload) => self.emit(Envelope::new(event, payload)),
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", event, e);
                false
            }
        }
    }

    /// Drops every acknowledgement listener still waiting, returning how many.
    pub fn abandon_acks(&self) -> usize {
        let abandoned: Vec<Subscription> = self
            .acks
            .lock()
            .drain(..)
            .filter(Subscription::is_registered)
            .collect();

        if !abandoned.is_empty() {
            tracing::warn!("Abandoned {} unanswered acknowledgements", abandoned.len());
        }
        abandoned.len()
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.lock().iter().filter(|s| s.is_registered()).count()
    }

    fn submit_with_ack<F>(&self, channel: ResponseChannel, command: &DeviceCommand, on_ack: F) -> bool
    where
        F: FnOnce(Ack) + Send + 'static,
    {
        let sector = command.sector;
        let target = command.device.clone();
        let device = command.device.clone();

        let subscription = self.dispatcher.once_where(
            channel.response_event(),
            move |data| Echo::from_response(data).matches(sector, &target),
            move |data| {
                let ack = Ack::from_response(data);
                match &ack {
                    Ack::Success(_) => tracing::info!("Command for {} acknowledged", device),
                    Ack::Error(e) => tracing::error!("Command for {} rejected: {}", device, e),
                }
                on_ack(ack);
            },
        );

        if !self.submit(channel.request_event(), command) {
            return false;
        }

        let mut acks = self.acks.lock();
        acks.retain(Subscription::is_registered);
        if acks.len() >= MAX_PENDING_ACKS {
            if let Some(oldest) = acks.pop_front() {
                tracing::warn!(event = oldest.event(), "Dropping unanswered acknowledgement");
            }
        }
        acks.push_back(subscription);

        true
    }

    fn emit(&self, envelope: Envelope) -> bool {
        if !self.transport.is_connected() {
            tracing::error!(event = %envelope.event, "Not connected to server, reconnecting");
            self.transport.reconnect();
            return false;
        }

        let event = envelope.event.clone();
        match self.transport.emit(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to send {}: {}", event, e);
                false
            }
        }
    }
}

fn device_command(
    sector: Sector,
    device: &str,
    status: bool,
    control_type: ControlType,
    extra: CommandExtra,
) -> DeviceCommand {
    DeviceCommand {
        sector,
        device: device.to_string(),
        status,
        control_type,
        extra,
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::testing::MockTransport;

    fn encoder(transport: &Arc<MockTransport>) -> (CommandEncoder, Arc<Dispatcher>) {
        let dispatcher = Dispatcher::new();
        let encoder = CommandEncoder::new(transport.clone(), dispatcher.clone());
        (encoder, dispatcher)
    }

    #[test]
    fn test_disconnected_command_is_not_emitted() {
        let transport = MockTransport::disconnected();
        let (encoder, _) = encoder(&transport);

        for sector in Sector::ALL {
            for device in ["Light", "Motor Fan", "Pump"] {
                let reconnects = transport.reconnects();
                assert!(!encoder.send_device_command(
                    sector,
                    device,
                    true,
                    ControlType::Manual,
                    CommandExtra::new()
                ));
                assert_eq!(transport.reconnects(), reconnects + 1);
            }
        }

        assert!(!encoder.change_control_type(
            Sector::A,
            "Pump",
            ControlType::On,
            true,
            CommandExtra::new()
        ));
        assert!(!encoder.send_message(events::PING, json!({})));
        assert!(transport.emitted().is_empty());
    }

    #[test]
    fn test_device_command_payload() {
        let transport = MockTransport::connected();
        let (encoder, _) = encoder(&transport);

        assert!(encoder.send_device_command(
            Sector::C,
            "Motor Fan",
            true,
            ControlType::On,
            CommandExtra::new().with("command", "start")
        ));

        assert_eq!(
            transport.emitted(),
            vec![Envelope::new(
                events::DEVICE_COMMAND,
                json!({
                    "sector": "C",
                    "device": "Motor Fan",
                    "status": true,
                    "type": "On",
                    "command": "start"
                })
            )]
        );
        assert_eq!(transport.reconnects(), 0);
    }

    #[test]
    fn test_change_control_type_payload() {
        let transport = MockTransport::connected();
        let (encoder, _) = encoder(&transport);

        assert!(encoder.change_control_type(
            Sector::B,
            "Pump",
            ControlType::Schedule,
            false,
            CommandExtra::new()
                .with("startTime", "08:00")
                .with("endTime", "18:00")
        ));

        let emitted = transport.emitted();
        assert_eq!(emitted[0].event, events::CONTROL_TYPE_CHANGE);
        assert_eq!(
            emitted[0].data,
            json!({
                "sector": "B",
                "device": "Pump",
                "status": false,
                "type": "Schedule",
                "startTime": "08:00",
                "endTime": "18:00"
            })
        );
    }

    #[test]
    fn test_emit_failure_reports_false() {
        let transport = MockTransport::connected();
        transport.set_fail_emit(true);
        let (encoder, _) = encoder(&transport);

        assert!(!encoder.send_message(events::PING, json!({})));
        assert_eq!(transport.reconnects(), 0);
    }

    #[test]
    fn test_ack_callback() {
        let transport = MockTransport::connected();
        let (encoder, dispatcher) = encoder(&transport);
        let acks = Arc::new(Mutex::new(Vec::new()));

        let seen = acks.clone();
        assert!(encoder.send_device_command_with_ack(
            Sector::A,
            "Light",
            true,
            ControlType::Manual,
            CommandExtra::new(),
            move |ack| seen.lock().push(ack)
        ));
        assert_eq!(dispatcher.listener_count(events::COMMAND_RESPONSE), 1);

        dispatcher.dispatch(Envelope::new(
            events::COMMAND_RESPONSE,
            json!({ "error": "device offline" }),
        ));
        dispatcher.dispatch(Envelope::new(events::COMMAND_RESPONSE, json!({})));

        assert_eq!(*acks.lock(), vec![Ack::Error(String::from("device offline"))]);
        assert_eq!(encoder.pending_acks(), 0);
    }

    #[test]
    fn test_ack_waits_for_its_own_device() {
        let transport = MockTransport::connected();
        let (encoder, dispatcher) = encoder(&transport);
        let acks = Arc::new(Mutex::new(Vec::new()));

        let seen = acks.clone();
        assert!(encoder.change_control_type_with_ack(
            Sector::B,
            "Pump",
            ControlType::On,
            true,
            CommandExtra::new(),
            move |ack| seen.lock().push(ack)
        ));

        dispatcher.dispatch(Envelope::new(
            events::TYPE_CHANGE_RESPONSE,
            json!({ "error": "relay fault", "sector": "B", "device": "Light" }),
        ));
        dispatcher.dispatch(Envelope::new(
            events::COMMAND_RESPONSE,
            json!({ "sector": "B", "device": "Pump" }),
        ));
        assert!(acks.lock().is_empty());
        assert_eq!(encoder.pending_acks(), 1);

        dispatcher.dispatch(Envelope::new(
            events::TYPE_CHANGE_RESPONSE,
            json!({ "status": "ok", "sector": "B", "device": "Pump" }),
        ));
        assert_eq!(acks.lock().len(), 1);
        assert!(acks.lock()[0].is_success());
        assert_eq!(dispatcher.listener_count(events::TYPE_CHANGE_RESPONSE), 0);
    }

    #[test]
    fn test_unanswered_acks_are_bounded() {
        let transport = MockTransport::connected();
        let (encoder, dispatcher) = encoder(&transport);

        for _ in 0..MAX_PENDING_ACKS + 5 {
            assert!(encoder.send_device_command_with_ack(
                Sector::A,
                "Light",
                true,
                ControlType::On,
                CommandExtra::new(),
                |_| {}
            ));
        }
        assert_eq!(encoder.pending_acks(), MAX_PENDING_ACKS);
        assert_eq!(dispatcher.listener_count(events::COMMAND_RESPONSE), MAX_PENDING_ACKS);

        assert_eq!(encoder.abandon_acks(), MAX_PENDING_ACKS);
        assert_eq!(dispatcher.listener_count(events::COMMAND_RESPONSE), 0);
    }

    #[test]
    fn test_echo_matching() {
        let echo = Echo::from_response(&json!({ "status": "ok", "sector": "C", "device": "Pump" }));
        assert!(echo.matches(Sector::C, "Pump"));
        assert!(!echo.matches(Sector::A, "Pump"));
        assert!(!echo.matches(Sector::C, "Light"));

        let bare = Echo::from_response(&json!({ "error": "busy" }));
        assert!(bare.is_empty());
        assert!(bare.matches(Sector::D, "Light"));
        assert!(Echo::from_response(&json!("ok")).is_empty());
    }

    #[test]
    fn test_ensure_connected() {
        let transport = MockTransport::disconnected();
        let (encoder, _) = encoder(&transport);

        assert!(!encoder.ensure_connected());
        assert_eq!(transport.reconnects(), 1);

        transport.set_connected(true);
        assert!(encoder.ensure_connected());
        assert_eq!(transport.reconnects(), 1);
    }

    #[test]
    fn test_ack_listener_dropped_when_not_sent() {
        let transport = MockTransport::disconnected();
        let (encoder, dispatcher) = encoder(&transport);

        assert!(!encoder.change_control_type_with_ack(
            Sector::D,
            "Light",
            ControlType::Off,
            false,
            CommandExtra::new(),
            |_| panic!("no response expected")
        ));
        assert_eq!(dispatcher.listener_count(events::TYPE_CHANGE_RESPONSE), 0);
    }

    #[test]
    fn test_ack_from_response() {
        assert!(Ack::from_response(&json!({ "status": "ok" })).is_success());
        assert!(Ack::from_response(&json!({ "error": null })).is_success());
        assert_eq!(
            Ack::from_response(&json!({ "error": "bad sector" })),
            Ack::Error(String::from("bad sector"))
        );
        assert!(!Ack::from_response(&json!("ok")).is_success());
    }
}
