mod common;

mod tests {
    use std::rc::Rc;

    use crate::common::*;
    use myrtio_output_channels::driver::ClocklessProtocol;
    use myrtio_output_channels::translation::PulseTable;
    use myrtio_output_channels::{
        BufferLayout, BufferRegion, CapacityListener, ConfigError, Diagnostic, HardwareError,
        Instant, InterruptEvent, OutputChannel, OutputManager, OutputType, SharedOutputs,
        StoreError,
    };
    use serde_json::{Value, json};

    #[derive(Default)]
    struct Recorder {
        layouts: Vec<BufferLayout>,
    }

    impl CapacityListener for Recorder {
        fn buffer_layout_changed(&mut self, layout: &BufferLayout) {
            self.layouts.push(layout.clone());
        }
    }

    type Manager = OutputManager<MockBoard, Recorder, 4, 1024>;

    fn document(channels: Value) -> Value {
        json!({
            "output_config": {
                "cfgver": 1,
                "MaxChannels": 1024,
                "channels": channels,
            }
        })
    }

    fn store_with(channels: Value) -> MemoryStore {
        MemoryStore {
            document: Some(document(channels)),
            ..MemoryStore::default()
        }
    }

    fn manager() -> Manager {
        OutputManager::new(MockBoard::new(), board_slots(), Recorder::default())
    }

    fn full_channels() -> Value {
        json!({
            "0": { "type": 0, "0": { "pixel_count": 10, "gamma": 1.0 } },
            "1": { "type": 2, "2": { "num_chan": 16 } },
            "2": { "type": 11, "11": { "pixel_count": 5 } },
            "3": { "type": 5, "5": {} },
        })
    }

    fn types(manager: &Manager) -> Vec<OutputType> {
        (0..4)
            .map(|slot| manager.driver(slot).unwrap().output_type())
            .collect()
    }

    fn has_diagnostic(manager: &Manager, check: impl Fn(&Diagnostic) -> bool) -> bool {
        manager.diagnostics().iter().any(check)
    }

    #[test]
    fn test_begin_without_stored_config_saves_default() {
        let mut manager = manager();
        let mut store = MemoryStore::default();

        manager.begin(&mut store);

        assert_eq!(store.saves, 1);
        assert_eq!(types(&manager), vec![OutputType::Disabled; 4]);
        assert_eq!(manager.layout().used(), 0);
        assert!(manager.diagnostics().is_empty());
        assert_eq!(manager.listener().layouts.len(), 1);

        let saved = store.document.clone().unwrap();
        assert_eq!(saved["output_config"]["cfgver"], json!(1));
        assert_eq!(saved["output_config"]["MaxChannels"], json!(1024));
        assert_eq!(saved["output_config"]["channels"]["3"]["type"], json!(7));

        manager.begin(&mut store);
        assert_eq!(store.saves, 1);
        assert_eq!(manager.listener().layouts.len(), 1);
    }

    #[test]
    fn test_default_config_carries_settings_for_each_legal_protocol() {
        let manager = manager();
        let document = manager.create_default_config();
        let channels = &document["output_config"]["channels"];

        let keys = |slot: &str| {
            let mut keys: Vec<String> =
                channels[slot].as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys("0"), vec!["0", "7", "8", "9", "type"]);
        assert_eq!(keys("1"), vec!["0", "1", "2", "3", "4", "7", "8", "9", "type"]);
        assert_eq!(keys("2"), vec!["10", "11", "7", "type"]);
        assert_eq!(keys("3"), vec!["5", "6", "7", "type"]);

        for slot in ["0", "1", "2", "3"] {
            assert_eq!(channels[slot]["type"], json!(7));
        }
        assert_eq!(channels["0"]["0"]["type"], json!("WS2811"));
        assert!(channels["0"]["9"]["currentlimit"].is_u64());
        assert!(channels["1"]["2"]["num_chan"].is_u64());
        assert!(channels["2"]["11"]["pixel_count"].is_u64());
        assert_eq!(channels["3"]["6"]["channels"].as_array().unwrap().len(), 16);
        // Built without claiming any peripheral
        assert_eq!(manager.board().acquisitions, 0);
    }

    #[test]
    fn test_begin_applies_stored_config() {
        let mut manager = manager();
        let mut store = store_with(full_channels());

        manager.begin(&mut store);

        assert_eq!(store.saves, 0);
        assert_eq!(
            types(&manager),
            vec![
                OutputType::Ws2811,
                OutputType::Dmx,
                OutputType::Apa102,
                OutputType::Relay,
            ]
        );
        assert_eq!(
            manager.layout().regions(),
            &[
                BufferRegion::new(0, 30),
                BufferRegion::new(30, 16),
                BufferRegion::new(46, 15),
                BufferRegion::new(61, 8),
            ]
        );
        assert_eq!(manager.layout().used(), 69);
        assert_eq!(manager.driver(1).unwrap().buffer_region(), BufferRegion::new(30, 16));
        assert!(manager.diagnostics().is_empty());
        assert_eq!(manager.board().acquisitions, 4);
    }

    #[test]
    fn test_unreadable_store_falls_back_to_default() {
        let mut manager = manager();
        let mut store = MemoryStore {
            document: Some(json!("not a config")),
            ..MemoryStore::default()
        };

        manager.begin(&mut store);

        assert_eq!(types(&manager), vec![OutputType::Disabled; 4]);
        assert_eq!(store.saves, 1);
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::ConfigDocument(ConfigError::MissingSection("output_config"))
        )));
    }

    #[test]
    fn test_unknown_type_code_disables_slot() {
        let mut manager = manager();
        let mut store = store_with(json!({
            "0": { "type": 99, "99": {} },
            "1": { "type": 7 },
            "2": { "type": 7 },
            "3": { "type": 7 },
        }));

        manager.begin(&mut store);

        assert_eq!(types(&manager)[0], OutputType::Disabled);
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::SlotConfig {
                slot: 0,
                error: ConfigError::UnknownType(99),
            }
        )));
    }

    #[test]
    fn test_protocol_on_wrong_peripheral_disables_slot() {
        let mut manager = manager();
        // DMX needs a serial unit; slot 0 only has a pulse train
        let mut store = store_with(json!({
            "0": { "type": 2, "2": {} },
            "1": { "type": 7 },
            "2": { "type": 7 },
            "3": { "type": 7 },
        }));

        manager.begin(&mut store);

        assert_eq!(types(&manager)[0], OutputType::Disabled);
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::SlotConfig {
                slot: 0,
                error: ConfigError::IllegalSlot {
                    slot: 0,
                    output_type: OutputType::Dmx,
                },
            }
        )));
        assert_eq!(manager.board().acquisitions, 0);
    }

    #[test]
    fn test_missing_slot_entry_and_settings() {
        let mut manager = manager();
        let mut store = store_with(json!({
            "0": { "type": 0 },
            "1": { "type": "DMX" },
            "3": { "type": 7 },
        }));

        manager.begin(&mut store);

        assert_eq!(types(&manager), vec![OutputType::Disabled; 4]);
        for slot in [0, 1, 2] {
            assert!(has_diagnostic(&manager, |d| matches!(
                d,
                Diagnostic::SlotConfig { slot: s, .. } if *s == slot
            )));
        }
    }

    #[test]
    fn test_version_mismatch_is_reported_and_applied() {
        let mut manager = manager();
        let mut store = MemoryStore {
            document: Some(json!({
                "output_config": {
                    "cfgver": 0,
                    "channels": { "1": { "type": 3, "3": { "num_chan": 8 } } },
                }
            })),
            ..MemoryStore::default()
        };

        manager.begin(&mut store);

        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::ConfigVersion {
                found: 0,
                expected: 1,
            }
        )));
        assert_eq!(types(&manager)[1], OutputType::Renard);
        assert_eq!(manager.layout().used(), 8);
    }

    #[test]
    fn test_peripheral_failure_is_kept_in_status() {
        let board = MockBoard::new();
        board.uarts[1].borrow_mut().reject_config = true;
        let mut manager: Manager = OutputManager::new(board, board_slots(), Recorder::default());
        let mut store = store_with(json!({ "1": { "type": 2, "2": {} } }));

        manager.begin(&mut store);

        assert_eq!(types(&manager)[1], OutputType::Dmx);
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::Hardware {
                slot: 1,
                error: HardwareError::ConfigurationRejected,
            }
        )));

        manager.render(Instant::from_millis(0));
        assert!(manager.board().uarts[1].borrow().fifo.is_empty());

        let status = manager.get_status();
        assert!(status["output"][1]["hardware_error"].is_string());
    }

    #[test]
    fn test_buffer_exhaustion_truncates_later_slots() {
        let mut manager: OutputManager<MockBoard, Recorder, 4, 40> =
            OutputManager::new(MockBoard::new(), board_slots(), Recorder::default());
        let mut store = store_with(full_channels());

        manager.begin(&mut store);

        assert_eq!(manager.layout().region(1), BufferRegion::new(30, 10));
        assert_eq!(manager.layout().region(2), BufferRegion::new(40, 0));
        assert!(manager.diagnostics().iter().any(|d| matches!(
            d,
            Diagnostic::BufferExhausted {
                slot: 1,
                requested: 16,
                granted: 10,
            }
        )));
        assert_eq!(manager.driver(2).unwrap().output_type(), OutputType::Apa102);
    }

    #[test]
    fn test_write_channels_is_bounded_by_used_size() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));

        assert_eq!(manager.write_channels(60, &[1; 20]), 9);
        assert_eq!(manager.write_channels(69, &[1; 4]), 0);
        assert_eq!(manager.write_channels(1000, &[1; 4]), 0);
        assert_eq!(manager.buffer().len(), 69);
        assert_eq!(manager.buffer()[68], 1);
    }

    #[test]
    fn test_render_sends_slot_data() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));

        let pixels: Vec<u8> = (1..=30).collect();
        manager.write_channels(0, &pixels);
        manager.write_channels(30, &[0xAB; 16]);
        manager.render(Instant::from_millis(0));

        let ring = Rc::clone(&manager.board().pulse_trains[0]);
        drain_pulse_train(&ring, |event| manager.handle_interrupt(0, event));
        let uart = Rc::clone(&manager.board().uarts[1]);
        drain_serial(&uart, |event| manager.handle_interrupt(1, event));

        let table = PulseTable::clockless(&ClocklessProtocol::WS2811.timing, false, 25);
        let sent = ring.borrow().sent.clone();
        assert_eq!(
            decode_bytes(&sent, table.data.lookup(1), table.data.lookup(0)),
            pixels
        );

        let bytes = uart.borrow().sent_bytes();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 0x00);
        assert!(bytes[1..].iter().all(|&byte| byte == 0xAB));

        assert_eq!(manager.board().spi.borrow().writes.len(), 1);
    }

    #[test]
    fn test_frame_in_flight_keeps_its_data() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));
        let ring = Rc::clone(&manager.board().pulse_trains[0]);
        let table = PulseTable::clockless(&ClocklessProtocol::WS2811.timing, false, 25);

        manager.render(Instant::from_millis(0));
        assert!(!manager.driver(0).unwrap().is_idle());
        assert_eq!(manager.write_channels(0, &[0xFF; 30]), 30);
        drain_pulse_train(&ring, |event| manager.handle_interrupt(0, event));

        let sent = ring.borrow().sent.clone();
        assert_eq!(
            decode_bytes(&sent, table.data.lookup(1), table.data.lookup(0)),
            vec![0; 30]
        );

        // The next frame picks up the new data
        manager.render(Instant::from_millis(50));
        drain_pulse_train(&ring, |event| manager.handle_interrupt(0, event));
        let sent = ring.borrow().sent.clone();
        assert_eq!(
            decode_bytes(&sent, table.data.lookup(1), table.data.lookup(0)),
            vec![0xFF; 30]
        );
    }

    #[test]
    fn test_reload_waits_for_frame_in_flight() {
        let mut manager = manager();
        manager.begin(&mut store_with(json!({
            "0": { "type": 0, "0": { "pixel_count": 30, "gamma": 1.0 } },
        })));
        let ring = Rc::clone(&manager.board().pulse_trains[0]);

        manager.render(Instant::from_millis(0));
        assert!(!manager.driver(0).unwrap().is_idle());

        let mut store = MemoryStore::default();
        let updated = document(json!({
            "0": { "type": 0, "0": { "pixel_count": 10, "gamma": 1.0 } },
        }));
        assert_eq!(manager.set_config(updated.clone(), &mut store), Ok(()));
        assert_eq!(store.document, Some(updated));

        manager.render(Instant::from_millis(1));
        assert!(manager.is_reload_pending());
        assert_eq!(manager.driver(0).unwrap().channels_needed(), 90);
        assert_eq!(ring.borrow().starts, 1);

        drain_pulse_train(&ring, |event| manager.handle_interrupt(0, event));
        assert!(manager.driver(0).unwrap().is_idle());

        manager.render(Instant::from_millis(50));
        assert!(!manager.is_reload_pending());
        assert_eq!(manager.driver(0).unwrap().channels_needed(), 30);
        assert_eq!(manager.layout().used(), 30);
        assert_eq!(ring.borrow().starts, 2);
    }

    #[test]
    fn test_reload_switches_protocol() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));
        let acquisitions = manager.board().acquisitions;

        let mut channels = full_channels();
        channels["1"] = json!({ "type": 3, "3": { "num_chan": 4 } });
        let mut store = MemoryStore::default();
        manager.set_config(document(channels), &mut store).unwrap();
        manager.render(Instant::from_millis(0));

        assert_eq!(types(&manager)[1], OutputType::Renard);
        assert_eq!(manager.board().acquisitions, acquisitions + 1);
        assert_eq!(manager.layout().region(2), BufferRegion::new(34, 15));
        assert_eq!(manager.listener().layouts.len(), 2);
    }

    #[test]
    fn test_set_config_applies_even_if_save_fails() {
        let mut manager = manager();
        manager.begin(&mut MemoryStore::default());

        let mut store = MemoryStore {
            fail_save: true,
            ..MemoryStore::default()
        };
        let result = manager.set_config(document(full_channels()), &mut store);
        assert_eq!(result, Err(StoreError::WriteFailed));
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::Store(StoreError::WriteFailed)
        )));

        manager.render(Instant::from_millis(0));
        assert_eq!(types(&manager)[3], OutputType::Relay);
    }

    #[test]
    fn test_document_without_channels_reloads_default() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));

        let mut store = MemoryStore::default();
        let result = manager.set_config(json!({ "output_config": { "cfgver": 1 } }), &mut store);
        assert_eq!(result, Ok(()));
        assert!(has_diagnostic(&manager, |d| matches!(
            d,
            Diagnostic::ConfigDocument(ConfigError::MissingSection("channels"))
        )));

        manager.render(Instant::from_millis(0));
        assert_eq!(types(&manager), vec![OutputType::Disabled; 4]);
        assert_eq!(manager.layout().used(), 0);
        assert_eq!(store.document, Some(manager.create_default_config()));
        for slot in ["0", "1", "2", "3"] {
            assert_eq!(
                store.document.as_ref().unwrap()["output_config"]["channels"][slot]["type"],
                json!(7)
            );
        }
    }

    #[test]
    fn test_pause_and_resume() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));

        manager.pause_outputs();
        manager.render(Instant::from_millis(0));
        assert!(manager.is_paused());
        assert_eq!(manager.board().pulse_trains[0].borrow().starts, 0);
        assert!(manager.board().spi.borrow().writes.is_empty());

        manager.resume_outputs();
        manager.render(Instant::from_millis(0));
        assert_eq!(manager.board().pulse_trains[0].borrow().starts, 1);
        assert_eq!(manager.board().spi.borrow().writes.len(), 1);
    }

    #[test]
    fn test_status_document() {
        let mut manager = manager();
        manager.begin(&mut store_with(full_channels()));

        let status = manager.get_status();
        assert_eq!(status["used"], json!(69));
        assert_eq!(status["paused"], json!(false));
        assert_eq!(status["output"].as_array().unwrap().len(), 4);
        assert_eq!(status["output"][0]["type"], json!("WS2811"));
        assert_eq!(status["output"][0]["pixel_count"], json!(10));
        assert_eq!(status["output"][1]["offset"], json!(30));
        assert_eq!(status["output"][1]["length"], json!(16));
        assert_eq!(status["output"][1]["baudrate"], json!(250_000));
        assert_eq!(status["output"][0]["state"], json!("idle"));
        assert!(status["diagnostics"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_shared_outputs_route_interrupts() {
        let mut manager = manager();
        manager.begin(&mut store_with(json!({
            "1": { "type": 2, "2": { "num_chan": 300 } },
        })));
        let uart = Rc::clone(&manager.board().uarts[1]);
        let shared = SharedOutputs::new(manager);

        assert_eq!(shared.write_channels(0, &[7; 300]), 300);
        shared.render(Instant::from_millis(0));
        assert!(uart.borrow().fifo_low);

        drain_serial(&uart, |event| shared.on_interrupt(1, event));
        assert_eq!(uart.borrow().sent_bytes().len(), 301);

        let manager = shared.into_inner();
        assert!(manager.driver(1).unwrap().is_idle());
        assert_eq!(manager.get_status()["output"][1]["frames"], json!(1));
    }

    #[test]
    fn test_interrupt_for_unknown_slot_is_ignored() {
        let mut manager = manager();
        manager.begin(&mut MemoryStore::default());
        manager.handle_interrupt(42, InterruptEvent::BufferLow);
        manager.handle_interrupt(0, InterruptEvent::TransmitEnd);
        assert!(manager.diagnostics().is_empty());
    }
}
