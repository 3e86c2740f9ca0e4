//! LIN controller core
//!
//! Implements the full LIN master/slave behavior on top of the participant
//! seams: initialization, pre-declared and dynamic responses, header and
//! transmission processing, go-to-sleep/wakeup handshakes, response-table
//! mirroring for all known peers, and replay integration.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::behavior::SimulationBehavior;
use super::node::LinNode;
use super::types::{
    go_to_sleep_frame, LinControllerConfig, LinControllerDynamicConfig, LinControllerMode,
    LinControllerStatus, LinDataLength, LinFrame, LinFrameHeaderEvent, LinFrameResponse,
    LinFrameResponseMode, LinFrameResponseType, LinFrameStatus, LinFrameStatusEvent,
    LinGoToSleepEvent, LinId, LinSlaveConfiguration, LinSlaveConfigurationEvent, LinWakeupEvent,
    SimulationMode, DATA_LENGTH_UNKNOWN, GO_TO_SLEEP_ID, MAX_DATA_LENGTH, MAX_LIN_ID,
};
use super::wire::{
    LinControllerStatusUpdate, LinFrameResponseUpdate, LinSendFrameHeaderRequest,
    LinSendFrameRequest, LinTransmission, WireLinControllerConfig, WireLinMessage,
};
use crate::config::ReplayConfig;
use crate::error::{CoreError, CoreResult};
use crate::handlers::{HandlerId, HandlerRegistry};
use crate::participant::{
    EndpointAddress, MessageTransport, ServiceDescriptor, ServiceDiscoveryEventType, ServiceType,
    TimeProvider, TransmitDirection,
};
use crate::replay::{ReplayDataController, ReplayMessage, TraceMessage, TraceSink};

/// A LIN bus controller attached to one simulated network.
///
/// All state mutations happen on the participant's dispatch path; one
/// controller instance is driven by one thread at a time. Handlers may be
/// registered from other threads.
pub struct LinController {
    pub(crate) descriptor: ServiceDescriptor,
    pub(crate) transport: Arc<dyn MessageTransport>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
    replay_config: Option<ReplayConfig>,
    replay_active: bool,
    replay_notice_logged: bool,

    pub(crate) controller_mode: LinControllerMode,
    pub(crate) controller_status: LinControllerStatus,
    pub(crate) dynamic_response: bool,
    pub(crate) behavior: SimulationBehavior,

    pub(crate) own_node: LinNode,
    /// Remote nodes, sorted by endpoint address, created lazily
    pub(crate) peer_nodes: Vec<LinNode>,
    lin_ids_responded_by_slaves: Vec<LinId>,

    pub(crate) frame_status_handlers: HandlerRegistry<LinFrameStatusEvent>,
    go_to_sleep_handlers: HandlerRegistry<LinGoToSleepEvent>,
    pub(crate) wakeup_handlers: HandlerRegistry<LinWakeupEvent>,
    frame_header_handlers: HandlerRegistry<LinFrameHeaderEvent>,
    slave_configuration_handlers: HandlerRegistry<LinSlaveConfigurationEvent>,
    trace_sinks: Vec<Arc<Mutex<dyn TraceSink>>>,

    /// Reception time of a slave configuration seen before any handler was
    /// registered; replayed once to the first handler added later
    pending_slave_configuration: Option<Duration>,
}

impl LinController {
    pub fn new(
        descriptor: ServiceDescriptor,
        replay_config: Option<ReplayConfig>,
        transport: Arc<dyn MessageTransport>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let replay_active = replay_config
            .as_ref()
            .map(|config| config.is_active())
            .unwrap_or(false);
        let own_node = LinNode::new(descriptor.endpoint_address);
        Self {
            descriptor,
            transport,
            time_provider,
            replay_config,
            replay_active,
            replay_notice_logged: false,
            controller_mode: LinControllerMode::Inactive,
            controller_status: LinControllerStatus::Unknown,
            dynamic_response: false,
            behavior: SimulationBehavior::Trivial,
            own_node,
            peer_nodes: Vec::new(),
            lin_ids_responded_by_slaves: Vec::new(),
            frame_status_handlers: HandlerRegistry::new(),
            go_to_sleep_handlers: HandlerRegistry::new(),
            wakeup_handlers: HandlerRegistry::new(),
            frame_header_handlers: HandlerRegistry::new(),
            slave_configuration_handlers: HandlerRegistry::new(),
            trace_sinks: Vec::new(),
            pending_slave_configuration: None,
        }
    }

    /// Name of this controller within its participant
    pub fn name(&self) -> &str {
        &self.descriptor.service_name
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    //------------------------
    // Error handling
    //------------------------

    fn ensure_initialized(&self, method: &str) -> CoreResult<()> {
        if self.controller_status == LinControllerStatus::Unknown {
            let msg = format!(
                "{} must only be called when the controller is initialized. Check whether a \
                 call to LinController::init is missing.",
                method
            );
            error!("{}", msg);
            return Err(CoreError::State(msg));
        }
        Ok(())
    }

    fn ensure_master(&self, method: &str) -> CoreResult<()> {
        if self.controller_mode != LinControllerMode::Master {
            let msg = format!("{} must only be called in master mode", method);
            error!("{}", msg);
            return Err(CoreError::State(msg));
        }
        Ok(())
    }

    fn ensure_not_dynamic(&self, method: &str) -> CoreResult<()> {
        if self.dynamic_response {
            let msg = format!(
                "{} can not be called if the node was initialized with init_dynamic",
                method
            );
            error!("{}", msg);
            return Err(CoreError::State(msg));
        }
        Ok(())
    }

    fn ensure_dynamic(&self, method: &str) -> CoreResult<()> {
        if !self.dynamic_response {
            let msg = format!(
                "{} can only be called if the node was initialized with init_dynamic",
                method
            );
            error!("{}", msg);
            return Err(CoreError::State(msg));
        }
        Ok(())
    }

    /// True when an API call must be ignored because the controller is
    /// driven by replay in send direction. The notice is logged once.
    fn replay_blocks_api(&mut self, method: &str) -> bool {
        let blocked = self.replay_active
            && self
                .replay_config
                .as_ref()
                .map(|config| config.direction.enables(TransmitDirection::Send))
                .unwrap_or(false);
        if blocked && !self.replay_notice_logged {
            self.replay_notice_logged = true;
            debug!(
                "LinController '{}': ignoring {} API call due to replay configuration",
                self.name(),
                method
            );
        }
        blocked
    }

    //------------------------
    // Public API
    //------------------------

    /// Initialize the controller with pre-declared responses.
    ///
    /// Must be called exactly once; the configuration is broadcast so peers
    /// can mirror this node's response table.
    pub fn init(&mut self, config: LinControllerConfig) -> CoreResult<()> {
        if config.mode == LinControllerMode::Inactive {
            let msg = "a LinController can't be initialized with LinControllerMode::Inactive";
            error!("{}", msg);
            return Err(CoreError::State(msg.to_string()));
        }
        if self.controller_status != LinControllerStatus::Unknown {
            let msg = "LinController::init must only be called once";
            error!("{}", msg);
            return Err(CoreError::State(msg.to_string()));
        }

        self.own_node.controller_mode = config.mode;
        self.own_node.controller_status = LinControllerStatus::Operational;
        self.own_node.update_responses(&config.frame_responses);

        self.controller_mode = config.mode;
        self.controller_status = LinControllerStatus::Operational;

        self.send_msg(WireLinMessage::ControllerConfig(WireLinControllerConfig {
            baud_rate: config.baud_rate,
            controller_mode: config.mode,
            simulation_mode: SimulationMode::Default,
            frame_responses: config.frame_responses,
        }));
        Ok(())
    }

    /// Initialize the controller in dynamic-response mode.
    ///
    /// The response table is not pre-populated; the node answers each
    /// observed header from within a header-event handler via
    /// [`Self::send_dynamic_response`].
    pub fn init_dynamic(&mut self, config: LinControllerDynamicConfig) -> CoreResult<()> {
        if config.mode == LinControllerMode::Inactive {
            let msg = "a LinController can't be initialized with LinControllerMode::Inactive";
            error!("{}", msg);
            return Err(CoreError::State(msg.to_string()));
        }
        if self.controller_status != LinControllerStatus::Unknown {
            let msg = "LinController::init must only be called once";
            error!("{}", msg);
            return Err(CoreError::State(msg.to_string()));
        }

        self.own_node.controller_mode = config.mode;
        self.own_node.controller_status = LinControllerStatus::Operational;
        self.own_node.simulation_mode = SimulationMode::Dynamic;

        self.controller_mode = config.mode;
        self.controller_status = LinControllerStatus::Operational;
        self.dynamic_response = true;

        self.send_msg(WireLinMessage::ControllerConfig(WireLinControllerConfig {
            baud_rate: config.baud_rate,
            controller_mode: config.mode,
            simulation_mode: SimulationMode::Dynamic,
            frame_responses: Vec::new(),
        }));
        Ok(())
    }

    /// Publish a response for the header currently being processed.
    ///
    /// Only valid on dynamic nodes, typically called from a header-event
    /// handler. Configures a transient `TxUnconditional` slot and re-enters
    /// header dispatch.
    pub fn send_dynamic_response(&mut self, frame: &LinFrame) -> CoreResult<()> {
        self.ensure_initialized("send_dynamic_response")?;
        self.ensure_dynamic("send_dynamic_response")?;

        if frame.id >= MAX_LIN_ID {
            warn!("Invalid ID={} in call to 'send_dynamic_response'", frame.id);
            return Ok(());
        }
        let response = LinFrameResponse {
            frame: *frame,
            response_mode: LinFrameResponseMode::TxUnconditional,
        };
        self.update_frame_response(response);

        let request = LinSendFrameHeaderRequest {
            timestamp: self.time_provider.now(),
            id: frame.id,
        };
        self.process_frame_header_request(&request, true);
        Ok(())
    }

    pub fn mode(&self) -> LinControllerMode {
        self.controller_mode
    }

    pub fn status(&self) -> LinControllerStatus {
        self.controller_status
    }

    /// Transmit a frame as the master, requesting the given response kind
    pub fn send_frame(
        &mut self,
        frame: LinFrame,
        response_type: LinFrameResponseType,
    ) -> CoreResult<()> {
        self.ensure_initialized("send_frame")?;
        self.ensure_master("send_frame")?;
        self.ensure_not_dynamic("send_frame")?;

        if frame.id >= MAX_LIN_ID {
            warn!("Invalid ID={} in call to 'send_frame'", frame.id);
            return Ok(());
        }
        if response_type == LinFrameResponseType::MasterResponse {
            if frame.checksum_model == super::types::LinChecksumModel::Unknown {
                let msg = format!("LinFrame with ID {} has an undefined checksum model", frame.id);
                error!("{}", msg);
                return Err(CoreError::State(msg));
            }
            if frame.data_length == DATA_LENGTH_UNKNOWN {
                let msg = format!("LinFrame with ID {} has an undefined data length", frame.id);
                error!("{}", msg);
                return Err(CoreError::State(msg));
            }
        }

        if self.replay_blocks_api("send_frame") {
            return Ok(());
        }

        self.send_frame_internal(frame, response_type);
        Ok(())
    }

    pub(crate) fn send_frame_internal(
        &mut self,
        frame: LinFrame,
        response_type: LinFrameResponseType,
    ) {
        if response_type == LinFrameResponseType::MasterResponse {
            self.update_frame_response(LinFrameResponse {
                frame,
                response_mode: LinFrameResponseMode::TxUnconditional,
            });
        } else {
            // Keep the slave-configuration view valid: only headers with a
            // known responder (or a dynamic node) reach the bus.
            if !self.has_responding_slave(frame.id) && !self.has_dynamic_node() {
                warn!(
                    "No slave has configured a response for ID={}. Use init() or \
                     set_frame_response() on the slave node to configure responses.",
                    frame.id
                );
                let event = LinFrameStatusEvent {
                    timestamp: self.time_provider.now(),
                    frame,
                    status: LinFrameStatus::RxNoResponse,
                };
                self.frame_status_handlers.invoke_all(&event);
                return;
            }

            if response_type == LinFrameResponseType::SlaveResponse {
                match self.own_slot_mode(frame.id) {
                    LinFrameResponseMode::Unused => {
                        // The master intends to listen for the response
                        self.update_frame_response(LinFrameResponse {
                            frame,
                            response_mode: LinFrameResponseMode::Rx,
                        });
                    }
                    LinFrameResponseMode::TxUnconditional => {
                        warn!(
                            "Master has already configured a response on ID={}. Ignoring this \
                             call to send_frame()",
                            frame.id
                        );
                        return;
                    }
                    LinFrameResponseMode::Rx => {}
                }
            } else {
                // SlaveToSlave: the master is an observer of the exchange
                let event = LinFrameStatusEvent {
                    timestamp: self.time_provider.now(),
                    frame,
                    status: LinFrameStatus::TxOk,
                };
                self.frame_status_handlers.invoke_all(&event);
            }
        }

        self.send_msg(WireLinMessage::SendFrameRequest(LinSendFrameRequest {
            frame,
            response_type,
        }));
    }

    /// Transmit a header without declaring a response
    pub fn send_frame_header(&mut self, id: LinId) -> CoreResult<()> {
        self.ensure_initialized("send_frame_header")?;
        self.ensure_master("send_frame_header")?;

        if id >= MAX_LIN_ID {
            warn!("Invalid ID={} in call to 'send_frame_header'", id);
            return Ok(());
        }
        if self.replay_blocks_api("send_frame_header") {
            return Ok(());
        }

        self.send_msg(WireLinMessage::SendFrameHeaderRequest(
            LinSendFrameHeaderRequest {
                timestamp: self.time_provider.now(),
                id,
            },
        ));
        Ok(())
    }

    /// Replace the payload of a slot already configured `TxUnconditional`
    pub fn update_tx_buffer(&mut self, frame: LinFrame) -> CoreResult<()> {
        self.ensure_initialized("update_tx_buffer")?;
        self.ensure_not_dynamic("update_tx_buffer")?;

        if frame.id >= MAX_LIN_ID {
            warn!("Invalid ID={} in call to 'update_tx_buffer'", frame.id);
            return Ok(());
        }
        if self.own_slot_mode(frame.id) != LinFrameResponseMode::TxUnconditional {
            let msg = format!(
                "this node must be configured with LinFrameResponseMode::TxUnconditional to \
                 update the TxBuffer for ID {}",
                frame.id
            );
            error!("{}", msg);
            return Err(CoreError::Configuration(msg));
        }

        self.own_node.update_tx_buffer(frame.id, frame.data);

        // The network simulator generates transmissions from its mirror, so
        // it must see the new payload
        if self.behavior.is_detailed() {
            let response = self.own_node.responses[frame.id as usize];
            self.broadcast(WireLinMessage::FrameResponseUpdate(
                LinFrameResponseUpdate {
                    frame_responses: vec![response],
                },
            ));
        }
        Ok(())
    }

    /// Declare this node's role for one frame identifier.
    ///
    /// A non-`Unused` slot cannot be reconfigured.
    pub fn set_frame_response(&mut self, response: LinFrameResponse) -> CoreResult<()> {
        self.ensure_initialized("set_frame_response")?;
        self.ensure_not_dynamic("set_frame_response")?;

        if response.frame.id >= MAX_LIN_ID {
            warn!(
                "Invalid ID={} in call to 'set_frame_response'",
                response.frame.id
            );
            return Ok(());
        }
        if response.response_mode == LinFrameResponseMode::Unused {
            let msg =
                "LinFrameResponseMode::Unused is not allowed in call to 'set_frame_response'";
            error!("{}", msg);
            return Err(CoreError::Configuration(msg.to_string()));
        }
        let current = self.own_slot_mode(response.frame.id);
        if current != LinFrameResponseMode::Unused {
            let msg = format!(
                "can't set response mode for ID={}; mode is already configured to {}",
                response.frame.id, current
            );
            error!("{}", msg);
            return Err(CoreError::Configuration(msg));
        }

        if self.replay_blocks_api("set_frame_response") {
            return Ok(());
        }

        self.update_frame_response(response);
        Ok(())
    }

    /// Update the local slot and distribute the change to all peers
    pub(crate) fn update_frame_response(&mut self, response: LinFrameResponse) {
        self.own_node.update_responses(std::slice::from_ref(&response));
        self.send_msg(WireLinMessage::FrameResponseUpdate(
            LinFrameResponseUpdate {
                frame_responses: vec![response],
            },
        ));
    }

    /// Send the go-to-sleep frame and enter sleep state (master only)
    pub fn go_to_sleep(&mut self) -> CoreResult<()> {
        self.ensure_initialized("go_to_sleep")?;
        self.ensure_master("go_to_sleep")?;

        if self.replay_blocks_api("go_to_sleep") {
            return Ok(());
        }

        match self.behavior.clone() {
            SimulationBehavior::Trivial => super::trivial::go_to_sleep(self),
            SimulationBehavior::Detailed { simulated_link } => {
                super::detailed::go_to_sleep(self, &simulated_link)
            }
        }
        // The SleepPending handshake of the detailed behavior stays internal
        self.controller_status = LinControllerStatus::Sleep;
        Ok(())
    }

    /// Enter sleep state without transmitting a frame
    pub fn go_to_sleep_internal(&mut self) -> CoreResult<()> {
        self.ensure_initialized("go_to_sleep_internal")?;
        self.set_controller_status_internal(LinControllerStatus::Sleep);
        Ok(())
    }

    /// Send a wakeup pulse and become operational
    pub fn wakeup(&mut self) -> CoreResult<()> {
        self.ensure_initialized("wakeup")?;

        match self.behavior.clone() {
            SimulationBehavior::Trivial => super::trivial::wakeup(self),
            SimulationBehavior::Detailed { simulated_link } => {
                super::detailed::wakeup(self, &simulated_link)
            }
        }
        Ok(())
    }

    /// Become operational without transmitting a wakeup pulse
    pub fn wakeup_internal(&mut self) -> CoreResult<()> {
        self.ensure_initialized("wakeup_internal")?;
        self.set_controller_status_internal(LinControllerStatus::Operational);
        Ok(())
    }

    /// The identifiers known to be answered by slaves (master only)
    pub fn slave_configuration(&self) -> CoreResult<LinSlaveConfiguration> {
        self.ensure_master("slave_configuration")?;
        Ok(LinSlaveConfiguration {
            responding_lin_ids: self.lin_ids_responded_by_slaves.clone(),
        })
    }

    //------------------------
    // Handlers
    //------------------------

    pub fn add_frame_status_handler<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&LinFrameStatusEvent) + Send + 'static,
    {
        self.frame_status_handlers.add(handler)
    }

    pub fn remove_frame_status_handler(&self, id: HandlerId) {
        self.frame_status_handlers.remove_or_warn(id, "FrameStatus");
    }

    pub fn add_go_to_sleep_handler<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&LinGoToSleepEvent) + Send + 'static,
    {
        self.go_to_sleep_handlers.add(handler)
    }

    pub fn remove_go_to_sleep_handler(&self, id: HandlerId) {
        self.go_to_sleep_handlers.remove_or_warn(id, "GoToSleep");
    }

    pub fn add_wakeup_handler<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&LinWakeupEvent) + Send + 'static,
    {
        self.wakeup_handlers.add(handler)
    }

    pub fn remove_wakeup_handler(&self, id: HandlerId) {
        self.wakeup_handlers.remove_or_warn(id, "Wakeup");
    }

    /// Header events are only delivered on dynamic-response nodes
    pub fn add_frame_header_handler<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&LinFrameHeaderEvent) + Send + 'static,
    {
        self.frame_header_handlers.add(handler)
    }

    pub fn remove_frame_header_handler(&self, id: HandlerId) {
        self.frame_header_handlers.remove_or_warn(id, "FrameHeader");
    }

    /// A configuration observed before the first handler was added is
    /// replayed as exactly one synthetic event carrying the reception time.
    pub fn add_lin_slave_configuration_handler<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&LinSlaveConfigurationEvent) + Send + 'static,
    {
        let id = self.slave_configuration_handlers.add(handler);
        if let Some(timestamp) = self.pending_slave_configuration.take() {
            self.slave_configuration_handlers
                .invoke_all(&LinSlaveConfigurationEvent { timestamp });
        }
        id
    }

    pub fn remove_lin_slave_configuration_handler(&self, id: HandlerId) {
        self.slave_configuration_handlers
            .remove_or_warn(id, "LinSlaveConfiguration");
    }

    /// Attach a trace sink fed with every sent and received frame
    pub fn add_trace_sink(&mut self, sink: Arc<Mutex<dyn TraceSink>>) {
        self.trace_sinks.push(sink);
    }

    //------------------------
    // Behavior switch
    //------------------------

    /// React to a service discovery event.
    ///
    /// A link service appearing on this controller's network switches the
    /// controller to detailed behavior; its removal reverts to trivial.
    pub fn receive_service_discovery_event(
        &mut self,
        event_type: ServiceDiscoveryEventType,
        remote: &ServiceDescriptor,
    ) {
        let relevant = remote.service_type == ServiceType::Link
            && remote.network_name == self.descriptor.network_name;
        if self.behavior.is_trivial() {
            if event_type == ServiceDiscoveryEventType::ServiceCreated && relevant {
                info!(
                    "Controller '{}' is using the simulated network '{}' and will route all \
                     messages to the network simulator '{}'",
                    self.name(),
                    remote.network_name,
                    remote.participant_name
                );
                self.behavior = SimulationBehavior::Detailed {
                    simulated_link: remote.clone(),
                };
            }
        } else if event_type == ServiceDiscoveryEventType::ServiceRemoved && relevant {
            warn!(
                "The network simulator for controller '{}' left the simulation. The controller \
                 is no longer simulated.",
                self.name()
            );
            self.behavior = SimulationBehavior::Trivial;
        }
    }

    pub(crate) fn allow_reception(&self, from: &ServiceDescriptor) -> bool {
        match &self.behavior {
            SimulationBehavior::Trivial => true,
            // The network simulator addresses this controller with its own
            // service id; anything else is silently dropped
            SimulationBehavior::Detailed { simulated_link } => {
                simulated_link.participant_name == from.participant_name
                    && from.service_id == self.descriptor.service_id
            }
        }
    }

    //------------------------
    // Message sending
    //------------------------

    pub(crate) fn send_msg(&mut self, msg: WireLinMessage) {
        match self.behavior.clone() {
            SimulationBehavior::Trivial => super::trivial::send_msg(self, msg),
            SimulationBehavior::Detailed { simulated_link } => {
                super::detailed::send_msg(self, &simulated_link, msg)
            }
        }
    }

    pub(crate) fn broadcast(&self, msg: WireLinMessage) {
        self.transport.send_broadcast(&self.descriptor, msg);
    }

    pub(crate) fn send_targeted(&self, target_participant: &str, msg: WireLinMessage) {
        self.transport
            .send_targeted(&self.descriptor, target_participant, msg);
    }

    pub(crate) fn now(&self) -> Duration {
        self.time_provider.now()
    }

    fn process_frame_header_request(&mut self, request: &LinSendFrameHeaderRequest, originator: bool) {
        match self.behavior.clone() {
            SimulationBehavior::Trivial => {
                super::trivial::process_frame_header_request(self, request, originator)
            }
            // The network simulator owns header resolution
            SimulationBehavior::Detailed { .. } => {}
        }
    }

    //------------------------
    // Helpers
    //------------------------

    pub(crate) fn own_slot(&self, id: LinId) -> LinFrameResponse {
        self.own_node.responses[id as usize]
    }

    pub(crate) fn own_slot_mode(&self, id: LinId) -> LinFrameResponseMode {
        self.own_node.responses[id as usize].response_mode
    }

    fn has_responding_slave(&self, id: LinId) -> bool {
        self.lin_ids_responded_by_slaves.contains(&id)
    }

    pub(crate) fn has_dynamic_node(&self) -> bool {
        std::iter::once(&self.own_node)
            .chain(self.peer_nodes.iter())
            .any(|node| node.simulation_mode == SimulationMode::Dynamic)
    }

    /// Count the operational `TxUnconditional` responders for `id` and
    /// return the last seen response payload
    pub(crate) fn get_response(&self, id: LinId) -> (usize, LinFrame) {
        let mut frame = LinFrame {
            id,
            ..Default::default()
        };
        let mut num_responses = 0;
        for node in std::iter::once(&self.own_node).chain(self.peer_nodes.iter()) {
            if node.controller_mode == LinControllerMode::Inactive {
                continue;
            }
            if node.controller_status != LinControllerStatus::Operational {
                continue;
            }
            let response = &node.responses[id as usize];
            if response.response_mode == LinFrameResponseMode::TxUnconditional {
                frame = response.frame;
                num_responses += 1;
            }
        }
        (num_responses, frame)
    }

    fn peer_node_mut(&mut self, address: EndpointAddress) -> &mut LinNode {
        let index = match self
            .peer_nodes
            .binary_search_by_key(&address, |node| node.address)
        {
            Ok(index) => index,
            Err(index) => {
                self.peer_nodes.insert(index, LinNode::new(address));
                index
            }
        };
        &mut self.peer_nodes[index]
    }

    fn update_lin_ids_responded_by_slaves(&mut self, responses: &[LinFrameResponse]) {
        for response in responses {
            if response.response_mode == LinFrameResponseMode::TxUnconditional
                && response.frame.id < MAX_LIN_ID
                && !self.has_responding_slave(response.frame.id)
            {
                self.lin_ids_responded_by_slaves.push(response.frame.id);
            }
        }
    }

    pub(crate) fn set_controller_status_internal(&mut self, status: LinControllerStatus) {
        if self.controller_status == status {
            warn!(
                "Invalid LinController status change: controller is already in {} mode",
                status
            );
        }
        self.controller_status = status;
        self.send_msg(WireLinMessage::ControllerStatusUpdate(
            LinControllerStatusUpdate {
                timestamp: self.time_provider.now(),
                status,
            },
        ));
    }

    pub(crate) fn trace(
        &self,
        direction: TransmitDirection,
        timestamp: Duration,
        frame: &LinFrame,
    ) {
        if self.trace_sinks.is_empty() {
            return;
        }
        let message = TraceMessage::LinFrame(*frame);
        for sink in &self.trace_sinks {
            sink.lock().unwrap().trace(direction, timestamp, &message);
        }
    }

    /// Deliver a transmission this node just put on the wire to its own
    /// handlers, converting `Rx` to `Tx` status when this node responded
    pub(crate) fn deliver_local_transmission(&mut self, transmission: LinTransmission) {
        let mut status = transmission.status;
        if self.own_slot_mode(transmission.frame.id) == LinFrameResponseMode::TxUnconditional {
            status = status.to_tx_status();
        }
        self.trace(
            status.tracing_direction(),
            transmission.timestamp,
            &transmission.frame,
        );
        self.frame_status_handlers.invoke_all(&LinFrameStatusEvent {
            timestamp: transmission.timestamp,
            frame: transmission.frame,
            status,
        });
    }

    //------------------------
    // Message reception
    //------------------------

    /// Entry point for all inbound LIN wire messages
    pub fn receive_message(&mut self, from: &ServiceDescriptor, msg: WireLinMessage) {
        match msg {
            WireLinMessage::SendFrameHeaderRequest(request) => {
                self.receive_frame_header_request(from, request)
            }
            WireLinMessage::Transmission(transmission) => {
                self.receive_transmission(from, transmission)
            }
            WireLinMessage::WakeupPulse(pulse) => self.receive_wakeup_pulse(from, pulse),
            WireLinMessage::FrameResponseUpdate(update) => {
                self.receive_frame_response_update(from, update)
            }
            WireLinMessage::ControllerConfig(config) => {
                self.receive_controller_config(from, config)
            }
            WireLinMessage::ControllerStatusUpdate(update) => {
                self.receive_controller_status_update(from, update)
            }
            WireLinMessage::SendFrameRequest(_) => {
                // Only a network simulator processes send-frame requests
                debug!(
                    "LinController '{}': ignoring LinSendFrameRequest from '{}'",
                    self.name(),
                    from.participant_name
                );
            }
        }
    }

    fn receive_frame_header_request(
        &mut self,
        from: &ServiceDescriptor,
        request: LinSendFrameHeaderRequest,
    ) {
        if !self.allow_reception(from) {
            return;
        }
        if request.id >= MAX_LIN_ID {
            warn!(
                "LinController received a header request with invalid LIN ID {} from {{{}, {}}}",
                request.id, from.participant_name, from.service_name
            );
            return;
        }

        if self.dynamic_response {
            self.frame_header_handlers.invoke_all(&LinFrameHeaderEvent {
                timestamp: request.timestamp,
                id: request.id,
            });
            return;
        }

        self.process_frame_header_request(&request, false);
    }

    fn receive_transmission(&mut self, from: &ServiceDescriptor, msg: LinTransmission) {
        if !self.allow_reception(from) {
            return;
        }
        if self.controller_mode == LinControllerMode::Inactive {
            warn!("Inactive LinController received a transmission. This transmission is ignored.");
            return;
        }

        let frame = msg.frame;
        let is_go_to_sleep_frame =
            frame.id == GO_TO_SLEEP_ID && frame.data == go_to_sleep_frame().data;

        if frame.data_length != DATA_LENGTH_UNKNOWN && frame.data_length > MAX_DATA_LENGTH {
            warn!(
                "LinController received transmission with invalid payload length {} from \
                 {{{}, {}}}. This transmission is ignored.",
                frame.data_length, from.participant_name, from.service_name
            );
            return;
        }
        if frame.id >= MAX_LIN_ID {
            warn!(
                "LinController received transmission with invalid LIN ID {} from {{{}, {}}}. \
                 This transmission is ignored.",
                frame.id, from.participant_name, from.service_name
            );
            return;
        }

        self.trace(TransmitDirection::Receive, msg.timestamp, &frame);

        let status = match self.behavior.clone() {
            SimulationBehavior::Trivial => {
                super::trivial::calc_frame_status(self, &msg, is_go_to_sleep_frame)
            }
            SimulationBehavior::Detailed { .. } => {
                super::detailed::calc_frame_status(self, &msg, is_go_to_sleep_frame)
            }
        };

        if status != LinFrameStatus::NotOk {
            self.frame_status_handlers.invoke_all(&LinFrameStatusEvent {
                timestamp: msg.timestamp,
                frame,
                status,
            });
        }

        // The master issued the go-to-sleep command; only slaves observe it
        if is_go_to_sleep_frame && self.controller_mode == LinControllerMode::Slave {
            self.go_to_sleep_handlers
                .invoke_all(&LinGoToSleepEvent {
                    timestamp: msg.timestamp,
                });
        }
    }

    fn receive_wakeup_pulse(&mut self, from: &ServiceDescriptor, msg: super::wire::LinWakeupPulse) {
        if !self.allow_reception(from) {
            return;
        }
        self.wakeup_handlers.invoke_all(&LinWakeupEvent {
            timestamp: msg.timestamp,
            direction: msg.direction,
        });
    }

    fn receive_frame_response_update(
        &mut self,
        from: &ServiceDescriptor,
        msg: LinFrameResponseUpdate,
    ) {
        // Self-delivered messages are rejected
        if *from == self.descriptor {
            return;
        }
        self.handle_responses_update(from, &msg.frame_responses);
    }

    fn receive_controller_config(
        &mut self,
        from: &ServiceDescriptor,
        msg: WireLinControllerConfig,
    ) {
        // Self-delivered messages are rejected
        if *from == self.descriptor {
            return;
        }
        let node = self.peer_node_mut(from.to_endpoint_address());
        node.controller_mode = msg.controller_mode;
        node.controller_status = LinControllerStatus::Operational;
        node.simulation_mode = msg.simulation_mode;

        self.handle_responses_update(from, &msg.frame_responses);
    }

    fn receive_controller_status_update(
        &mut self,
        from: &ServiceDescriptor,
        msg: LinControllerStatusUpdate,
    ) {
        let node = self.peer_node_mut(from.to_endpoint_address());
        node.controller_status = msg.status;
    }

    fn handle_responses_update(
        &mut self,
        from: &ServiceDescriptor,
        responses: &[LinFrameResponse],
    ) {
        let node = self.peer_node_mut(from.to_endpoint_address());
        node.update_responses(responses);
        let node_mode = node.controller_mode;

        if node_mode == LinControllerMode::Slave {
            self.update_lin_ids_responded_by_slaves(responses);
        }

        let timestamp = self.time_provider.now();
        if self.slave_configuration_handlers.is_empty() {
            // No handlers yet; trigger once upon handler addition
            self.pending_slave_configuration = Some(timestamp);
        } else {
            self.slave_configuration_handlers
                .invoke_all(&LinSlaveConfigurationEvent { timestamp });
        }
    }

    /// Adopt checksum model and data length from a received frame where the
    /// local slot has not pinned them yet
    pub(crate) fn pin_rx_slot_metadata(&mut self, frame: &LinFrame) {
        let slot = &mut self.own_node.responses[frame.id as usize];
        if slot.frame.checksum_model == super::types::LinChecksumModel::Unknown {
            slot.frame.checksum_model = frame.checksum_model;
        }
        if slot.frame.data_length == DATA_LENGTH_UNKNOWN {
            slot.frame.data_length = frame.data_length;
        }
    }
}

impl ReplayDataController for LinController {
    /// Inject one recorded message as if it originated from the live API.
    ///
    /// Replay drives masters only; the response updates keep every
    /// controller's notion of the generated response consistent.
    fn replay_message(&mut self, msg: &ReplayMessage) {
        if !self.replay_active {
            return;
        }
        if self.controller_mode != LinControllerMode::Master {
            debug!(
                "replay_message: skipping, because controller mode is {}",
                self.controller_mode
            );
            return;
        }

        let frame = match &msg.message {
            TraceMessage::LinFrame(frame) => *frame,
            other => {
                debug!(
                    "replay_message: ignoring trace message of type {}",
                    other.message_type()
                );
                return;
            }
        };
        if frame.id >= MAX_LIN_ID {
            warn!("Ignoring replay message with invalid LIN ID {}", frame.id);
            return;
        }

        let is_sleep_frame = frame.id == GO_TO_SLEEP_ID && frame.data == go_to_sleep_frame().data;
        let is_receive = msg.direction == TransmitDirection::Receive;

        // Ensure slave responses are updated locally and on all peers
        let response = LinFrameResponse {
            frame,
            response_mode: if is_receive {
                LinFrameResponseMode::Rx
            } else {
                LinFrameResponseMode::TxUnconditional
            },
        };
        self.update_frame_response(response);

        if is_sleep_frame {
            match self.behavior.clone() {
                SimulationBehavior::Trivial => super::trivial::go_to_sleep(self),
                SimulationBehavior::Detailed { simulated_link } => {
                    super::detailed::go_to_sleep(self, &simulated_link)
                }
            }
            self.controller_status = LinControllerStatus::Sleep;
            return;
        }

        let response_type = if is_receive {
            LinFrameResponseType::SlaveResponse
        } else {
            LinFrameResponseType::MasterResponse
        };
        self.send_frame_internal(frame, response_type);
    }
}

/// Helper for tests and embedding code driving several controllers in-process
pub type SharedLinController = Arc<Mutex<LinController>>;

/// Data length field rendered for diagnostics
pub(crate) fn data_length_str(length: LinDataLength) -> String {
    if length == DATA_LENGTH_UNKNOWN {
        "Unknown".to_string()
    } else {
        length.to_string()
    }
}
