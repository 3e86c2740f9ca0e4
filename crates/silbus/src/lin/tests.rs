//! Tests for the LIN controller

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use super::super::wire::*;
    use super::super::*;
    use crate::config::{ReplayConfig, ReplayDirection};
    use crate::error::CoreError;
    use crate::participant::*;
    use crate::replay::{ReplayDataController, ReplayMessage, TraceMessage};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MockTimeProvider {
        now: Mutex<Duration>,
        synchronized: bool,
    }

    impl MockTimeProvider {
        fn new() -> Self {
            Self {
                now: Mutex::new(Duration::ZERO),
                synchronized: true,
            }
        }

        fn advance(&self, delta: Duration) {
            *self.now.lock().unwrap() += delta;
        }
    }

    impl TimeProvider for MockTimeProvider {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn is_synchronizing_virtual_time(&self) -> bool {
            self.synchronized
        }
    }

    struct Routed {
        from: ServiceDescriptor,
        target: Option<String>,
        msg: WireLinMessage,
    }

    /// Queueing transport: messages are recorded and delivered to the
    /// registered controllers when the test pumps the queue.
    struct TestBus {
        queue: Mutex<VecDeque<Routed>>,
        sent: Mutex<Vec<(ServiceDescriptor, Option<String>, WireLinMessage)>>,
    }

    impl TestBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
            })
        }

        /// Deliver queued messages until the queue runs dry. Deliveries may
        /// enqueue new messages, which are processed in arrival order.
        fn drain(&self, controllers: &[Arc<Mutex<LinController>>]) {
            loop {
                let routed = match self.queue.lock().unwrap().pop_front() {
                    Some(routed) => routed,
                    None => break,
                };
                for controller in controllers {
                    let mut controller = controller.lock().unwrap();
                    if *controller.descriptor() == routed.from {
                        continue;
                    }
                    if let Some(target) = &routed.target {
                        if controller.descriptor().participant_name != *target {
                            continue;
                        }
                    }
                    controller.receive_message(&routed.from, routed.msg.clone());
                }
            }
        }

        fn sent(&self) -> Vec<(ServiceDescriptor, Option<String>, WireLinMessage)> {
            self.sent.lock().unwrap().clone()
        }

        fn transmissions(&self) -> Vec<LinTransmission> {
            self.sent()
                .into_iter()
                .filter_map(|(_, _, msg)| match msg {
                    WireLinMessage::Transmission(tm) => Some(tm),
                    _ => None,
                })
                .collect()
        }

        fn status_updates(&self) -> Vec<LinControllerStatusUpdate> {
            self.sent()
                .into_iter()
                .filter_map(|(_, _, msg)| match msg {
                    WireLinMessage::ControllerStatusUpdate(update) => Some(update),
                    _ => None,
                })
                .collect()
        }

        fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    impl MessageTransport for TestBus {
        fn send_broadcast(&self, from: &ServiceDescriptor, msg: WireLinMessage) {
            self.sent
                .lock()
                .unwrap()
                .push((from.clone(), None, msg.clone()));
            self.queue.lock().unwrap().push_back(Routed {
                from: from.clone(),
                target: None,
                msg,
            });
        }

        fn send_targeted(
            &self,
            from: &ServiceDescriptor,
            target_participant: &str,
            msg: WireLinMessage,
        ) {
            self.sent.lock().unwrap().push((
                from.clone(),
                Some(target_participant.to_string()),
                msg.clone(),
            ));
            self.queue.lock().unwrap().push_back(Routed {
                from: from.clone(),
                target: Some(target_participant.to_string()),
                msg,
            });
        }
    }

    fn descriptor(participant: &str, controller: &str, id: u32) -> ServiceDescriptor {
        ServiceDescriptor {
            participant_name: participant.to_string(),
            service_name: controller.to_string(),
            network_name: "LIN1".to_string(),
            service_type: ServiceType::Controller,
            service_id: u64::from(id),
            endpoint_address: EndpointAddress {
                participant: id,
                endpoint: 1,
            },
        }
    }

    fn make_controller(
        participant: &str,
        controller: &str,
        id: u32,
        bus: &Arc<TestBus>,
        time: &Arc<MockTimeProvider>,
    ) -> Arc<Mutex<LinController>> {
        Arc::new(Mutex::new(LinController::new(
            descriptor(participant, controller, id),
            None,
            Arc::clone(bus) as Arc<dyn MessageTransport>,
            Arc::clone(time) as Arc<dyn TimeProvider>,
        )))
    }

    fn make_replay_controller(
        participant: &str,
        controller: &str,
        id: u32,
        direction: ReplayDirection,
        bus: &Arc<TestBus>,
        time: &Arc<MockTimeProvider>,
    ) -> Arc<Mutex<LinController>> {
        let replay = ReplayConfig {
            use_trace_source: "Source1".to_string(),
            direction,
            ..Default::default()
        };
        Arc::new(Mutex::new(LinController::new(
            descriptor(participant, controller, id),
            Some(replay),
            Arc::clone(bus) as Arc<dyn MessageTransport>,
            Arc::clone(time) as Arc<dyn TimeProvider>,
        )))
    }

    fn master_config() -> LinControllerConfig {
        LinControllerConfig {
            mode: LinControllerMode::Master,
            baud_rate: 20_000,
            frame_responses: Vec::new(),
        }
    }

    fn slave_config_with_tx(id: LinId, data: [u8; 8]) -> LinControllerConfig {
        LinControllerConfig {
            mode: LinControllerMode::Slave,
            baud_rate: 20_000,
            frame_responses: vec![LinFrameResponse {
                frame: LinFrame {
                    id,
                    checksum_model: LinChecksumModel::Enhanced,
                    data_length: 8,
                    data,
                },
                response_mode: LinFrameResponseMode::TxUnconditional,
            }],
        }
    }

    fn record_frame_status(
        controller: &Arc<Mutex<LinController>>,
    ) -> Arc<Mutex<Vec<LinFrameStatusEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        controller.lock().unwrap().add_frame_status_handler(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    //------------------------
    // Initialization
    //------------------------

    #[test]
    fn test_init_rejects_inactive_mode() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);

        let config = LinControllerConfig {
            mode: LinControllerMode::Inactive,
            ..Default::default()
        };
        let result = master.lock().unwrap().init(config);
        assert!(matches!(result, Err(CoreError::State(_))));
        assert_eq!(master.lock().unwrap().status(), LinControllerStatus::Unknown);
    }

    #[test]
    fn test_init_must_only_be_called_once() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);

        assert!(master.lock().unwrap().init(master_config()).is_ok());
        assert_eq!(
            master.lock().unwrap().status(),
            LinControllerStatus::Operational
        );
        let result = master.lock().unwrap().init(master_config());
        assert!(matches!(result, Err(CoreError::State(_))));
    }

    #[test]
    fn test_api_calls_require_initialization() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let mut ctrl = master.lock().unwrap();

        let frame = LinFrame::default();
        assert!(matches!(
            ctrl.send_frame(frame, LinFrameResponseType::SlaveResponse),
            Err(CoreError::State(_))
        ));
        assert!(matches!(ctrl.send_frame_header(17), Err(CoreError::State(_))));
        assert!(matches!(ctrl.go_to_sleep(), Err(CoreError::State(_))));
        assert!(matches!(ctrl.go_to_sleep_internal(), Err(CoreError::State(_))));
        assert!(matches!(ctrl.wakeup(), Err(CoreError::State(_))));
        assert!(matches!(ctrl.wakeup_internal(), Err(CoreError::State(_))));
        assert!(matches!(
            ctrl.update_tx_buffer(frame),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn test_send_frame_requires_master_mode() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();

        let result = slave
            .lock()
            .unwrap()
            .send_frame(LinFrame::default(), LinFrameResponseType::SlaveResponse);
        assert!(matches!(result, Err(CoreError::State(_))));
    }

    #[test]
    fn test_master_response_requires_pinned_checksum_and_length() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();

        let unpinned_checksum = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Unknown,
            data_length: 8,
            data: [0; 8],
        };
        assert!(matches!(
            master
                .lock()
                .unwrap()
                .send_frame(unpinned_checksum, LinFrameResponseType::MasterResponse),
            Err(CoreError::State(_))
        ));

        let unpinned_length = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Classic,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        };
        assert!(matches!(
            master
                .lock()
                .unwrap()
                .send_frame(unpinned_length, LinFrameResponseType::MasterResponse),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn test_responses_table_id_invariant() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let config = LinControllerConfig {
            mode: LinControllerMode::Slave,
            baud_rate: 20_000,
            frame_responses: vec![
                LinFrameResponse {
                    frame: LinFrame {
                        id: 3,
                        ..Default::default()
                    },
                    response_mode: LinFrameResponseMode::Rx,
                },
                LinFrameResponse {
                    frame: LinFrame {
                        id: 60,
                        ..Default::default()
                    },
                    response_mode: LinFrameResponseMode::TxUnconditional,
                },
            ],
        };
        slave.lock().unwrap().init(config).unwrap();

        let ctrl = slave.lock().unwrap();
        for i in 0..MAX_LIN_ID {
            let slot_id = ctrl.own_node.responses[i as usize].frame.id;
            assert!(
                slot_id == i || slot_id == 0,
                "slot {} holds frame id {}",
                i,
                slot_id
            );
        }
    }

    //------------------------
    // Header dispatch and tie-break
    //------------------------

    /// With n slaves declaring TxUnconditional for the same id, the status
    /// is RX_NO_RESPONSE for n=0, RX_OK for n=1 and RX_ERROR for n>=2.
    #[test]
    fn test_header_tie_break_exhaustive() {
        for n in 0..4usize {
            let bus = TestBus::new();
            let time = Arc::new(MockTimeProvider::new());
            let master = make_controller("P0", "LinM", 1, &bus, &time);
            let mut nodes = vec![Arc::clone(&master)];
            for k in 0..n {
                let slave = make_controller(
                    &format!("P{}", k + 1),
                    &format!("LinS{}", k),
                    (k + 2) as u32,
                    &bus,
                    &time,
                );
                slave
                    .lock()
                    .unwrap()
                    .init(slave_config_with_tx(17, [k as u8; 8]))
                    .unwrap();
                nodes.push(slave);
            }
            master.lock().unwrap().init(master_config()).unwrap();
            bus.drain(&nodes);
            bus.clear_sent();

            let master_events = record_frame_status(&master);
            let frame = LinFrame {
                id: 17,
                checksum_model: LinChecksumModel::Enhanced,
                data_length: DATA_LENGTH_UNKNOWN,
                data: [0; 8],
            };
            master
                .lock()
                .unwrap()
                .send_frame(frame, LinFrameResponseType::SlaveResponse)
                .unwrap();
            bus.drain(&nodes);

            let expected = match n {
                0 => LinFrameStatus::RxNoResponse,
                1 => LinFrameStatus::RxOk,
                _ => LinFrameStatus::RxError,
            };
            let events = master_events.lock().unwrap();
            assert_eq!(events.len(), 1, "n={}", n);
            assert_eq!(events[0].status, expected, "n={}", n);

            let transmissions = bus.transmissions();
            if n == 0 {
                // Synthesized locally without touching the bus
                assert!(transmissions.is_empty(), "n=0 must not reach the bus");
            } else {
                assert_eq!(transmissions.len(), 1, "n={}", n);
                assert_eq!(transmissions[0].status, expected, "n={}", n);
            }
        }
    }

    /// A master header answered by exactly one slave responder.
    #[test]
    fn test_master_header_single_slave_responder() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, payload))
            .unwrap();
        bus.drain(&nodes);
        bus.clear_sent();

        let master_events = record_frame_status(&master);
        let slave_events = record_frame_status(&slave);

        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::SlaveResponse)
            .unwrap();
        bus.drain(&nodes);

        // One transmission on the wire with RX_OK and the slave's payload
        let transmissions = bus.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].status, LinFrameStatus::RxOk);
        assert_eq!(transmissions[0].frame.data, payload);

        // Master observes RX_OK with the slave's payload
        let master_events = master_events.lock().unwrap();
        assert_eq!(master_events.len(), 1);
        assert_eq!(master_events[0].status, LinFrameStatus::RxOk);
        assert_eq!(master_events[0].frame.data, payload);

        // The responding slave observes TX_OK
        let slave_events = slave_events.lock().unwrap();
        assert_eq!(slave_events.len(), 1);
        assert_eq!(slave_events[0].status, LinFrameStatus::TxOk);
    }

    /// Two slaves declaring a response for the same id is an error on the
    /// wire and at the master.
    #[test]
    fn test_master_header_conflicting_slave_responders() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave_a = make_controller("P2", "LinSA", 2, &bus, &time);
        let slave_b = make_controller("P3", "LinSB", 3, &bus, &time);
        let nodes = vec![
            Arc::clone(&master),
            Arc::clone(&slave_a),
            Arc::clone(&slave_b),
        ];

        master.lock().unwrap().init(master_config()).unwrap();
        slave_a
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0xAA; 8]))
            .unwrap();
        slave_b
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0xBB; 8]))
            .unwrap();
        bus.drain(&nodes);
        bus.clear_sent();

        let master_events = record_frame_status(&master);
        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::SlaveResponse)
            .unwrap();
        bus.drain(&nodes);

        let transmissions = bus.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].status, LinFrameStatus::RxError);

        let events = master_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, LinFrameStatus::RxError);
    }

    /// The master provides the response itself; the listening slave sees
    /// RX_OK, the master converts to TX_OK.
    #[test]
    fn test_master_response_transmission() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        let slave_cfg = LinControllerConfig {
            mode: LinControllerMode::Slave,
            baud_rate: 20_000,
            frame_responses: vec![LinFrameResponse {
                frame: LinFrame {
                    id: 34,
                    checksum_model: LinChecksumModel::Enhanced,
                    data_length: 6,
                    data: [0; 8],
                },
                response_mode: LinFrameResponseMode::Rx,
            }],
        };
        slave.lock().unwrap().init(slave_cfg).unwrap();
        bus.drain(&nodes);

        let master_events = record_frame_status(&master);
        let slave_events = record_frame_status(&slave);

        let frame = LinFrame {
            id: 34,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 6,
            data: [3, 4, 3, 4, 3, 4, 0, 0],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::MasterResponse)
            .unwrap();
        bus.drain(&nodes);

        let master_events = master_events.lock().unwrap();
        assert_eq!(master_events.len(), 1);
        assert_eq!(master_events[0].status, LinFrameStatus::TxOk);

        let slave_events = slave_events.lock().unwrap();
        assert_eq!(slave_events.len(), 1);
        assert_eq!(slave_events[0].status, LinFrameStatus::RxOk);
        assert_eq!(slave_events[0].frame.data, frame.data);
    }

    /// SlaveToSlave: the master only observes and reports TX_OK locally.
    #[test]
    fn test_slave_to_slave_reports_tx_ok_to_master() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(21, [7; 8]))
            .unwrap();
        bus.drain(&nodes);

        let master_events = record_frame_status(&master);
        let frame = LinFrame {
            id: 21,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::SlaveToSlave)
            .unwrap();
        bus.drain(&nodes);

        let events = master_events.lock().unwrap();
        // Observer TX_OK first, then the transmission evaluated against the
        // master's unused slot
        assert_eq!(events[0].status, LinFrameStatus::TxOk);
    }

    //------------------------
    // Frame reception validation
    //------------------------

    #[test]
    fn test_reception_while_inactive_is_dropped() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let ctrl = make_controller("P1", "LinM", 1, &bus, &time);
        let events = record_frame_status(&ctrl);

        let from = descriptor("P9", "LinX", 9);
        let tm = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 10,
                checksum_model: LinChecksumModel::Classic,
                data_length: 2,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        ctrl.lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(tm));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reception_with_invalid_id_or_length_is_dropped() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let ctrl = make_controller("P1", "LinM", 1, &bus, &time);
        ctrl.lock().unwrap().init(master_config()).unwrap();
        let events = record_frame_status(&ctrl);

        let from = descriptor("P9", "LinX", 9);
        let bad_id = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: MAX_LIN_ID,
                checksum_model: LinChecksumModel::Classic,
                data_length: 2,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        ctrl.lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(bad_id));

        let bad_length = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 10,
                checksum_model: LinChecksumModel::Classic,
                data_length: 9,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        ctrl.lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(bad_length));

        assert!(events.lock().unwrap().is_empty());
    }

    /// A mismatch between pinned and received checksum model yields
    /// RX_ERROR; an unpinned model is adopted on first reception.
    #[test]
    fn test_checksum_model_pinning() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let config = LinControllerConfig {
            mode: LinControllerMode::Master,
            baud_rate: 20_000,
            frame_responses: vec![LinFrameResponse {
                frame: LinFrame {
                    id: 8,
                    checksum_model: LinChecksumModel::Unknown,
                    data_length: DATA_LENGTH_UNKNOWN,
                    data: [0; 8],
                },
                response_mode: LinFrameResponseMode::Rx,
            }],
        };
        master.lock().unwrap().init(config).unwrap();
        let events = record_frame_status(&master);

        let from = descriptor("P2", "LinS", 2);
        let enhanced = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 8,
                checksum_model: LinChecksumModel::Enhanced,
                data_length: 4,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        master
            .lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(enhanced));
        assert_eq!(events.lock().unwrap()[0].status, LinFrameStatus::RxOk);

        // The first reception pinned Enhanced/4; a classic frame now fails
        let classic = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 8,
                checksum_model: LinChecksumModel::Classic,
                data_length: 4,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        master
            .lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(classic));
        assert_eq!(events.lock().unwrap()[1].status, LinFrameStatus::RxError);

        let wrong_length = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 8,
                checksum_model: LinChecksumModel::Enhanced,
                data_length: 7,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        master
            .lock()
            .unwrap()
            .receive_message(&from, WireLinMessage::Transmission(wrong_length));
        assert_eq!(events.lock().unwrap()[2].status, LinFrameStatus::RxError);
    }

    //------------------------
    // Response table updates
    //------------------------

    /// Re-broadcasting the configuration resulting from set_frame_response
    /// leaves the peer's mirror equal to the sender's self-view.
    #[test]
    fn test_set_frame_response_mirrors_to_peers() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(LinControllerConfig {
                mode: LinControllerMode::Slave,
                baud_rate: 20_000,
                frame_responses: Vec::new(),
            })
            .unwrap();
        bus.drain(&nodes);

        let response = LinFrameResponse {
            frame: LinFrame {
                id: 44,
                checksum_model: LinChecksumModel::Classic,
                data_length: 4,
                data: [9, 9, 9, 9, 0, 0, 0, 0],
            },
            response_mode: LinFrameResponseMode::TxUnconditional,
        };
        slave.lock().unwrap().set_frame_response(response).unwrap();
        bus.drain(&nodes);

        let slave_view = slave.lock().unwrap().own_node.responses[44];
        let master_ctrl = master.lock().unwrap();
        let mirror = master_ctrl
            .peer_nodes
            .iter()
            .find(|node| node.address == descriptor("P2", "LinS", 2).endpoint_address)
            .expect("slave node mirrored on master");
        assert_eq!(mirror.responses[44], slave_view);

        // The master now knows the slave responds on id 44
        assert_eq!(
            master_ctrl.slave_configuration().unwrap().responding_lin_ids,
            vec![44]
        );
    }

    #[test]
    fn test_set_frame_response_rejects_unused_and_reconfiguration() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();

        let unused = LinFrameResponse {
            frame: LinFrame {
                id: 5,
                ..Default::default()
            },
            response_mode: LinFrameResponseMode::Unused,
        };
        assert!(matches!(
            slave.lock().unwrap().set_frame_response(unused),
            Err(CoreError::Configuration(_))
        ));

        // Slot 17 is already TxUnconditional and cannot be changed
        let reconfigure = LinFrameResponse {
            frame: LinFrame {
                id: 17,
                ..Default::default()
            },
            response_mode: LinFrameResponseMode::Rx,
        };
        assert!(matches!(
            slave.lock().unwrap().set_frame_response(reconfigure),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_update_tx_buffer_requires_tx_unconditional_slot() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();

        let mut frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 8,
            data: [0xEE; 8],
        };
        slave.lock().unwrap().update_tx_buffer(frame).unwrap();
        assert_eq!(
            slave.lock().unwrap().own_node.responses[17].frame.data,
            [0xEE; 8]
        );

        frame.id = 20;
        assert!(matches!(
            slave.lock().unwrap().update_tx_buffer(frame),
            Err(CoreError::Configuration(_))
        ));
    }

    /// A configuration received before any handler exists is replayed once
    /// to the first handler added, without duplicates for later handlers.
    #[test]
    fn test_slave_configuration_handler_latch() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        time.advance(Duration::from_millis(5));
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();
        bus.drain(&nodes);

        let first_events = Arc::new(Mutex::new(Vec::new()));
        let first_sink = Arc::clone(&first_events);
        master
            .lock()
            .unwrap()
            .add_lin_slave_configuration_handler(move |event| {
                first_sink.lock().unwrap().push(*event);
            });

        let events = first_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, Duration::from_millis(5));
        drop(events);

        // A second handler sees no catch-up event
        let second_events = Arc::new(Mutex::new(Vec::new()));
        let second_sink = Arc::clone(&second_events);
        master
            .lock()
            .unwrap()
            .add_lin_slave_configuration_handler(move |event| {
                second_sink.lock().unwrap().push(*event);
            });
        assert!(second_events.lock().unwrap().is_empty());
        assert_eq!(first_events.lock().unwrap().len(), 1);
    }

    //------------------------
    // Sleep and wakeup
    //------------------------

    #[test]
    fn test_go_to_sleep_sends_sentinel_and_status_update() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();
        bus.drain(&nodes);
        bus.clear_sent();

        let sleep_events = Arc::new(Mutex::new(0u32));
        let sleep_sink = Arc::clone(&sleep_events);
        slave.lock().unwrap().add_go_to_sleep_handler(move |_| {
            *sleep_sink.lock().unwrap() += 1;
        });

        master.lock().unwrap().go_to_sleep().unwrap();
        bus.drain(&nodes);

        // Exactly one transmission, matching the sleep sentinel, RX_OK
        let transmissions = bus.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].frame, go_to_sleep_frame());
        assert_eq!(transmissions[0].status, LinFrameStatus::RxOk);

        // Exactly one status update, to Sleep
        let updates = bus.status_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, LinControllerStatus::Sleep);

        assert_eq!(master.lock().unwrap().status(), LinControllerStatus::Sleep);
        assert_eq!(*sleep_events.lock().unwrap(), 1);
    }

    #[test]
    fn test_go_to_sleep_requires_master() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();
        assert!(matches!(
            slave.lock().unwrap().go_to_sleep(),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn test_wakeup_pulse_directions() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();
        bus.drain(&nodes);

        master.lock().unwrap().go_to_sleep().unwrap();
        bus.drain(&nodes);

        let master_wakeups = Arc::new(Mutex::new(Vec::new()));
        let master_sink = Arc::clone(&master_wakeups);
        master.lock().unwrap().add_wakeup_handler(move |event| {
            master_sink.lock().unwrap().push(*event);
        });
        let slave_wakeups = Arc::new(Mutex::new(Vec::new()));
        let slave_sink = Arc::clone(&slave_wakeups);
        slave.lock().unwrap().add_wakeup_handler(move |event| {
            slave_sink.lock().unwrap().push(*event);
        });

        slave.lock().unwrap().wakeup().unwrap();
        bus.drain(&nodes);

        // The waking node sees its own pulse with direction Send
        let slave_wakeups = slave_wakeups.lock().unwrap();
        assert_eq!(slave_wakeups.len(), 1);
        assert_eq!(slave_wakeups[0].direction, TransmitDirection::Send);

        // Peers observe the pulse with direction Receive
        let master_wakeups = master_wakeups.lock().unwrap();
        assert_eq!(master_wakeups.len(), 1);
        assert_eq!(master_wakeups[0].direction, TransmitDirection::Receive);

        assert_eq!(
            slave.lock().unwrap().status(),
            LinControllerStatus::Operational
        );
    }

    //------------------------
    // Dynamic response mode
    //------------------------

    #[test]
    fn test_dynamic_node_rejects_pre_declared_apis() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init_dynamic(LinControllerDynamicConfig {
                mode: LinControllerMode::Slave,
                baud_rate: 20_000,
            })
            .unwrap();

        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 8,
            data: [0; 8],
        };
        let mut ctrl = slave.lock().unwrap();
        assert!(matches!(
            ctrl.set_frame_response(LinFrameResponse {
                frame,
                response_mode: LinFrameResponseMode::TxUnconditional,
            }),
            Err(CoreError::State(_))
        ));
        assert!(matches!(ctrl.update_tx_buffer(frame), Err(CoreError::State(_))));
    }

    #[test]
    fn test_send_dynamic_response_requires_dynamic_node() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();
        let frame = LinFrame::default();
        assert!(matches!(
            master.lock().unwrap().send_dynamic_response(&frame),
            Err(CoreError::State(_))
        ));
    }

    /// A dynamic slave answers a header reactively: the header event fires,
    /// the user publishes via send_dynamic_response, and the master
    /// observes RX_OK with the dynamic payload.
    #[test]
    fn test_dynamic_response_round_trip() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init_dynamic(LinControllerDynamicConfig {
                mode: LinControllerMode::Slave,
                baud_rate: 20_000,
            })
            .unwrap();
        bus.drain(&nodes);

        let headers = Arc::new(Mutex::new(Vec::new()));
        let header_sink = Arc::clone(&headers);
        slave.lock().unwrap().add_frame_header_handler(move |event| {
            header_sink.lock().unwrap().push(*event);
        });
        let master_events = record_frame_status(&master);
        let slave_events = record_frame_status(&slave);

        let frame = LinFrame {
            id: 13,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: DATA_LENGTH_UNKNOWN,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::SlaveResponse)
            .unwrap();
        bus.drain(&nodes);

        // The dynamic node observed the header
        let observed = headers.lock().unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].id, 13);
        drop(observed);

        // The user answers from the header event
        let response_frame = LinFrame {
            id: 13,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 8,
            data: [0xD1; 8],
        };
        slave
            .lock()
            .unwrap()
            .send_dynamic_response(&response_frame)
            .unwrap();
        bus.drain(&nodes);

        let master_events = master_events.lock().unwrap();
        assert_eq!(master_events.len(), 1);
        assert_eq!(master_events[0].status, LinFrameStatus::RxOk);
        assert_eq!(master_events[0].frame.data, [0xD1; 8]);

        let slave_events = slave_events.lock().unwrap();
        assert_eq!(slave_events.len(), 1);
        assert_eq!(slave_events[0].status, LinFrameStatus::TxOk);
    }

    //------------------------
    // Behavior switch
    //------------------------

    fn netsim_descriptor(service_id: u64) -> ServiceDescriptor {
        ServiceDescriptor {
            participant_name: "NetSim".to_string(),
            service_name: "LIN1".to_string(),
            network_name: "LIN1".to_string(),
            service_type: ServiceType::Link,
            service_id,
            endpoint_address: EndpointAddress {
                participant: 100,
                endpoint: 1,
            },
        }
    }

    #[test]
    fn test_detailed_behavior_targets_network_simulator() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();

        master.lock().unwrap().receive_service_discovery_event(
            ServiceDiscoveryEventType::ServiceCreated,
            &netsim_descriptor(50),
        );
        bus.clear_sent();

        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 2,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::MasterResponse)
            .unwrap();

        let sent = bus.sent();
        // The response update stays broadcast; the send request is targeted
        let targeted: Vec<_> = sent
            .iter()
            .filter(|(_, target, _)| target.as_deref() == Some("NetSim"))
            .collect();
        assert_eq!(targeted.len(), 1);
        assert!(matches!(targeted[0].2, WireLinMessage::SendFrameRequest(_)));
        let broadcast: Vec<_> = sent
            .iter()
            .filter(|(_, target, _)| target.is_none())
            .collect();
        assert!(broadcast
            .iter()
            .all(|(_, _, msg)| matches!(msg, WireLinMessage::FrameResponseUpdate(_))));
    }

    #[test]
    fn test_detailed_behavior_filters_reception_to_simulator() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let own_service_id = master.lock().unwrap().descriptor().service_id;
        master.lock().unwrap().init(master_config()).unwrap();
        master.lock().unwrap().receive_service_discovery_event(
            ServiceDiscoveryEventType::ServiceCreated,
            &netsim_descriptor(50),
        );
        let events = record_frame_status(&master);

        let tm = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 17,
                checksum_model: LinChecksumModel::Enhanced,
                data_length: 2,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };

        // A frame from an ordinary peer is silently dropped
        let peer = descriptor("P2", "LinS", 2);
        master
            .lock()
            .unwrap()
            .receive_message(&peer, WireLinMessage::Transmission(tm.clone()));
        assert!(events.lock().unwrap().is_empty());

        // The network simulator addresses this controller with its own id
        let mut from_netsim = netsim_descriptor(50);
        from_netsim.service_id = own_service_id;
        master
            .lock()
            .unwrap()
            .receive_message(&from_netsim, WireLinMessage::Transmission(tm));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_simulator_departure_reverts_to_trivial() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();

        master.lock().unwrap().receive_service_discovery_event(
            ServiceDiscoveryEventType::ServiceCreated,
            &netsim_descriptor(50),
        );
        master.lock().unwrap().receive_service_discovery_event(
            ServiceDiscoveryEventType::ServiceRemoved,
            &netsim_descriptor(50),
        );

        // Any peer is accepted again
        let events = record_frame_status(&master);
        let peer = descriptor("P2", "LinS", 2);
        let tm = LinTransmission {
            timestamp: Duration::ZERO,
            frame: LinFrame {
                id: 17,
                checksum_model: LinChecksumModel::Enhanced,
                data_length: 2,
                data: [0; 8],
            },
            status: LinFrameStatus::RxOk,
        };
        master
            .lock()
            .unwrap()
            .receive_message(&peer, WireLinMessage::Transmission(tm));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_detailed_go_to_sleep_uses_sleep_pending_handshake() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();
        master.lock().unwrap().receive_service_discovery_event(
            ServiceDiscoveryEventType::ServiceCreated,
            &netsim_descriptor(50),
        );
        bus.clear_sent();

        master.lock().unwrap().go_to_sleep().unwrap();

        // The sleep frame goes to the simulator as a send request
        let sent = bus.sent();
        let targeted: Vec<_> = sent
            .iter()
            .filter(|(_, target, _)| target.as_deref() == Some("NetSim"))
            .collect();
        assert_eq!(targeted.len(), 1);
        match &targeted[0].2 {
            WireLinMessage::SendFrameRequest(request) => {
                assert_eq!(request.frame, go_to_sleep_frame());
                assert_eq!(
                    request.response_type,
                    LinFrameResponseType::MasterResponse
                );
            }
            other => panic!("unexpected message {:?}", other),
        }

        // SleepPending is visible to the peers, Sleep locally
        let updates = bus.status_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, LinControllerStatus::SleepPending);
        assert_eq!(master.lock().unwrap().status(), LinControllerStatus::Sleep);
    }

    //------------------------
    // Replay integration
    //------------------------

    fn lin_replay_message(
        frame: LinFrame,
        direction: TransmitDirection,
        at: Duration,
    ) -> ReplayMessage {
        ReplayMessage {
            timestamp: at,
            direction,
            message: TraceMessage::LinFrame(frame),
        }
    }

    #[test]
    fn test_replay_blocks_live_api_calls() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master =
            make_replay_controller("P1", "LinM", 1, ReplayDirection::SEND, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();
        bus.clear_sent();

        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 2,
            data: [0; 8],
        };
        master
            .lock()
            .unwrap()
            .send_frame(frame, LinFrameResponseType::MasterResponse)
            .unwrap();
        master.lock().unwrap().send_frame_header(17).unwrap();
        master.lock().unwrap().go_to_sleep().unwrap();

        assert!(bus.sent().is_empty());
        assert_eq!(
            master.lock().unwrap().status(),
            LinControllerStatus::Operational
        );
    }

    #[test]
    fn test_replay_is_rejected_on_slaves() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let slave =
            make_replay_controller("P2", "LinS", 2, ReplayDirection::BOTH, &bus, &time);
        slave
            .lock()
            .unwrap()
            .init(slave_config_with_tx(17, [0; 8]))
            .unwrap();
        bus.clear_sent();

        let frame = LinFrame {
            id: 17,
            checksum_model: LinChecksumModel::Enhanced,
            data_length: 8,
            data: [1; 8],
        };
        slave
            .lock()
            .unwrap()
            .replay_message(&lin_replay_message(frame, TransmitDirection::Send, Duration::ZERO));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_replay_send_direction_emits_master_response() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master =
            make_replay_controller("P1", "LinM", 1, ReplayDirection::BOTH, &bus, &time);
        let slave = make_controller("P2", "LinS", 2, &bus, &time);
        let nodes = vec![Arc::clone(&master), Arc::clone(&slave)];

        master.lock().unwrap().init(master_config()).unwrap();
        slave
            .lock()
            .unwrap()
            .init(LinControllerConfig {
                mode: LinControllerMode::Slave,
                baud_rate: 20_000,
                frame_responses: Vec::new(),
            })
            .unwrap();
        bus.drain(&nodes);
        bus.clear_sent();

        let master_events = record_frame_status(&master);
        let frame = LinFrame {
            id: 31,
            checksum_model: LinChecksumModel::Classic,
            data_length: 4,
            data: [4, 3, 2, 1, 0, 0, 0, 0],
        };
        master
            .lock()
            .unwrap()
            .replay_message(&lin_replay_message(frame, TransmitDirection::Send, Duration::ZERO));
        bus.drain(&nodes);

        // The replayed frame went out as a transmission with our payload
        let transmissions = bus.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].frame.data, frame.data);
        assert_eq!(transmissions[0].status, LinFrameStatus::RxOk);

        // The master delivered it locally as its own transmission
        let events = master_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, LinFrameStatus::TxOk);
    }

    #[test]
    fn test_replay_sleep_sentinel_enters_sleep() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master =
            make_replay_controller("P1", "LinM", 1, ReplayDirection::BOTH, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();
        bus.clear_sent();

        master.lock().unwrap().replay_message(&lin_replay_message(
            go_to_sleep_frame(),
            TransmitDirection::Send,
            Duration::ZERO,
        ));

        assert_eq!(master.lock().unwrap().status(), LinControllerStatus::Sleep);
        let transmissions = bus.transmissions();
        assert_eq!(transmissions.len(), 1);
        assert_eq!(transmissions[0].frame, go_to_sleep_frame());
    }

    //------------------------
    // Handlers
    //------------------------

    #[test]
    fn test_handler_removal_with_unknown_id_is_non_fatal() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        let ctrl = master.lock().unwrap();

        let id = ctrl.add_frame_status_handler(|_| {});
        ctrl.remove_frame_status_handler(id);
        // Second removal logs a warning but does not fail
        ctrl.remove_frame_status_handler(id);

        let id = ctrl.add_wakeup_handler(|_| {});
        ctrl.remove_wakeup_handler(id);
        ctrl.remove_wakeup_handler(id);
    }

    #[test]
    fn test_wakeup_pulse_reception_fires_no_frame_status_handler() {
        let bus = TestBus::new();
        let time = Arc::new(MockTimeProvider::new());
        let master = make_controller("P1", "LinM", 1, &bus, &time);
        master.lock().unwrap().init(master_config()).unwrap();

        let frame_events = record_frame_status(&master);
        let wakeups = Arc::new(Mutex::new(0u32));
        let wakeup_sink = Arc::clone(&wakeups);
        master.lock().unwrap().add_wakeup_handler(move |_| {
            *wakeup_sink.lock().unwrap() += 1;
        });

        let from = descriptor("P2", "LinS", 2);
        master.lock().unwrap().receive_message(
            &from,
            WireLinMessage::WakeupPulse(LinWakeupPulse {
                timestamp: Duration::ZERO,
                direction: TransmitDirection::Receive,
            }),
        );

        assert_eq!(*wakeups.lock().unwrap(), 1);
        assert!(frame_events.lock().unwrap().is_empty());
    }
}
