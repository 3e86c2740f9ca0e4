//! Detailed simulation behavior
//!
//! With a network simulator on the bus, all traffic-relevant messages are
//! targeted at the simulator participant, which owns header resolution,
//! timing and status computation. Bookkeeping messages remain broadcast so
//! all controllers keep their mirrors current.

use super::controller::LinController;
use super::types::{
    go_to_sleep_frame, LinControllerStatus, LinFrameResponseMode, LinFrameResponseType,
    LinFrameStatus, SimulationMode,
};
use super::wire::{LinSendFrameRequest, LinTransmission, LinWakeupPulse, WireLinMessage};
use crate::participant::{ServiceDescriptor, TransmitDirection};

/// Route one outbound message in detailed behavior
pub(crate) fn send_msg(
    ctrl: &mut LinController,
    simulated_link: &ServiceDescriptor,
    msg: WireLinMessage,
) {
    match msg {
        // Bus traffic goes to the simulator exclusively
        msg @ (WireLinMessage::SendFrameRequest(_)
        | WireLinMessage::SendFrameHeaderRequest(_)
        | WireLinMessage::Transmission(_)
        | WireLinMessage::WakeupPulse(_)) => {
            ctrl.send_targeted(&simulated_link.participant_name, msg);
        }
        // Configuration and status stay visible to every controller
        msg => ctrl.broadcast(msg),
    }
}

/// Status of a received transmission as reported by the simulator
pub(crate) fn calc_frame_status(
    ctrl: &LinController,
    transmission: &LinTransmission,
    is_go_to_sleep_frame: bool,
) -> LinFrameStatus {
    // Dynamic controllers report every transmission as it was received
    if ctrl.own_node.simulation_mode == SimulationMode::Dynamic {
        return transmission.status;
    }

    // A go-to-sleep frame with RX_OK is only accepted when configured for RX
    if is_go_to_sleep_frame && transmission.status == LinFrameStatus::RxOk {
        let response = ctrl.own_slot(transmission.frame.id);
        if response.response_mode != LinFrameResponseMode::Rx {
            return LinFrameStatus::RxNoResponse;
        }
    }

    transmission.status
}

/// Request sleep from the simulator.
///
/// The simulator finishes pending sleep-frame transmissions first, so the
/// status handshake goes through `SleepPending`.
pub(crate) fn go_to_sleep(ctrl: &mut LinController, simulated_link: &ServiceDescriptor) {
    let request = LinSendFrameRequest {
        frame: go_to_sleep_frame(),
        response_type: LinFrameResponseType::MasterResponse,
    };
    ctrl.send_targeted(
        &simulated_link.participant_name,
        WireLinMessage::SendFrameRequest(request),
    );

    ctrl.set_controller_status_internal(LinControllerStatus::SleepPending);
}

/// Send a wakeup pulse through the simulator and become operational
pub(crate) fn wakeup(ctrl: &mut LinController, simulated_link: &ServiceDescriptor) {
    let pulse = LinWakeupPulse {
        timestamp: ctrl.now(),
        direction: TransmitDirection::Send,
    };
    ctrl.send_targeted(
        &simulated_link.participant_name,
        WireLinMessage::WakeupPulse(pulse),
    );
    ctrl.set_controller_status_internal(LinControllerStatus::Operational);
}
