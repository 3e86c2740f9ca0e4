//! Trivial simulation behavior
//!
//! Without a network simulator the controller assumes an idealized bus:
//! headers are resolved against the locally mirrored response tables, the
//! responding node synthesizes the transmission, and sleep/wakeup take
//! effect immediately.

use log::warn;

use super::controller::{data_length_str, LinController};
use super::types::{
    go_to_sleep_frame, LinChecksumModel, LinControllerStatus, LinFrameResponseMode, LinFrameStatus,
    LinWakeupEvent, DATA_LENGTH_UNKNOWN, MAX_LIN_ID,
};
use super::wire::{LinSendFrameHeaderRequest, LinTransmission, LinWakeupPulse, WireLinMessage};
use crate::participant::TransmitDirection;

/// Route one outbound message in trivial behavior
pub(crate) fn send_msg(ctrl: &mut LinController, msg: WireLinMessage) {
    match msg {
        WireLinMessage::SendFrameRequest(request) => {
            // Responses were already updated by the caller; emitting the
            // header triggers the actual transmission
            let header = LinSendFrameHeaderRequest {
                timestamp: ctrl.now(),
                id: request.frame.id,
            };
            send_msg(ctrl, WireLinMessage::SendFrameHeaderRequest(header));
        }
        WireLinMessage::SendFrameHeaderRequest(header) => {
            // Distribute the header so dynamic nodes observe it, then
            // resolve it locally as the originator
            ctrl.broadcast(WireLinMessage::SendFrameHeaderRequest(header.clone()));
            process_frame_header_request(ctrl, &header, true);
        }
        other => ctrl.broadcast(other),
    }
}

/// Resolve a header against the mirrored response tables.
///
/// With exactly one operational responder, the responding node generates
/// the transmission. The error cases (no responder, conflicting responders)
/// are synthesized by the node that originated the header.
pub(crate) fn process_frame_header_request(
    ctrl: &mut LinController,
    header: &LinSendFrameHeaderRequest,
    originator: bool,
) {
    if header.id >= MAX_LIN_ID {
        warn!(
            "Ignoring header request with invalid LIN ID {}",
            header.id
        );
        return;
    }

    let (num_responses, frame) = ctrl.get_response(header.id);

    if num_responses == 1 {
        if ctrl.own_slot_mode(header.id) == LinFrameResponseMode::TxUnconditional {
            // This node provides the response
            let transmission = LinTransmission {
                timestamp: header.timestamp,
                frame,
                status: LinFrameStatus::RxOk,
            };
            ctrl.broadcast(WireLinMessage::Transmission(transmission.clone()));
            ctrl.deliver_local_transmission(transmission);
        }
        // Otherwise the responding peer generates the transmission from its
        // copy of the header
        return;
    }

    if !originator {
        return;
    }

    if num_responses == 0 && ctrl.has_dynamic_node() {
        // A dynamic node answers headers reactively; stay silent
        return;
    }

    let status = if num_responses == 0 {
        LinFrameStatus::RxNoResponse
    } else {
        LinFrameStatus::RxError
    };
    let transmission = LinTransmission {
        timestamp: header.timestamp,
        frame,
        status,
    };
    ctrl.broadcast(WireLinMessage::Transmission(transmission.clone()));
    ctrl.deliver_local_transmission(transmission);
}

/// Evaluate the status of a received transmission from the locally known
/// response configuration
pub(crate) fn calc_frame_status(
    ctrl: &mut LinController,
    transmission: &LinTransmission,
    is_go_to_sleep_frame: bool,
) -> LinFrameStatus {
    if is_go_to_sleep_frame {
        return LinFrameStatus::RxOk;
    }
    if ctrl.dynamic_response {
        // Dynamic nodes trust the sender's status verbatim
        return transmission.status;
    }

    let response = ctrl.own_slot(transmission.frame.id);
    match response.response_mode {
        LinFrameResponseMode::Unused => LinFrameStatus::RxNoResponse,
        LinFrameResponseMode::Rx => {
            // Verify checksum model and data length against the pinned
            // configuration; Unknown fields are adopted on success
            let configured = response.frame;
            let received = transmission.frame;

            if configured.checksum_model != LinChecksumModel::Unknown
                && received.checksum_model != LinChecksumModel::Unknown
                && configured.checksum_model != received.checksum_model
            {
                warn!(
                    "Mismatch between configured ({}) and received ({}) LinChecksumModel in \
                     LinFrame with ID {}",
                    configured.checksum_model, received.checksum_model, received.id
                );
                return LinFrameStatus::RxError;
            }
            if configured.data_length != DATA_LENGTH_UNKNOWN
                && received.data_length != DATA_LENGTH_UNKNOWN
                && configured.data_length != received.data_length
            {
                warn!(
                    "Mismatch between configured ({}) and received ({}) LinDataLength in \
                     LinFrame with ID {}, payload {}",
                    data_length_str(configured.data_length),
                    data_length_str(received.data_length),
                    received.id,
                    hex::encode(received.data)
                );
                return LinFrameStatus::RxError;
            }

            ctrl.pin_rx_slot_metadata(&received);
            transmission.status
        }
        LinFrameResponseMode::TxUnconditional => {
            // Transmissions travel with RX statuses; we sent this frame
            transmission.status.to_tx_status()
        }
    }
}

/// Transmit the go-to-sleep frame and transition directly to sleep
pub(crate) fn go_to_sleep(ctrl: &mut LinController) {
    let transmission = LinTransmission {
        timestamp: ctrl.now(),
        frame: go_to_sleep_frame(),
        status: LinFrameStatus::RxOk,
    };
    ctrl.broadcast(WireLinMessage::Transmission(transmission));

    ctrl.set_controller_status_internal(LinControllerStatus::Sleep);
}

/// Send a wakeup pulse and become operational.
///
/// Peers see the pulse with direction `Receive`; the own wakeup handlers
/// observe it with direction `Send` before the status changes.
pub(crate) fn wakeup(ctrl: &mut LinController) {
    let timestamp = ctrl.now();
    ctrl.broadcast(WireLinMessage::WakeupPulse(LinWakeupPulse {
        timestamp,
        direction: TransmitDirection::Receive,
    }));

    // No self delivery through the transport: invoke handlers directly
    ctrl.wakeup_handlers.invoke_all(&LinWakeupEvent {
        timestamp,
        direction: TransmitDirection::Send,
    });
    ctrl.set_controller_status_internal(LinControllerStatus::Operational);
}
