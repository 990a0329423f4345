mod common;

mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::common::*;
    use myrtio_output_channels::engine::PulseEngineConfig;
    use myrtio_output_channels::translation::{BitTiming, PulseTable};
    use myrtio_output_channels::{
        Duration, EncodingEngine, HardwareError, Instant, IntensitySource, InterruptEvent,
        PixelEncodingEngine, PulseCode, TransmissionState,
    };

    const TIMING: BitTiming = BitTiming {
        period_ns: 1250,
        t0h_ns: 250,
        t1h_ns: 600,
        reset_ns: 300_000,
    };

    struct Bytes {
        position: usize,
    }

    impl IntensitySource for Bytes {
        fn start_frame(&mut self) {
            self.position = 0;
        }

        fn next_intensity(&mut self, frame: &[u8]) -> Option<u8> {
            let value = frame.get(self.position).copied()?;
            self.position += 1;
            Some(value)
        }
    }

    fn config(min_frame_duration: Duration) -> PulseEngineConfig {
        PulseEngineConfig {
            table: PulseTable::clockless(&TIMING, false, 25),
            clock_divider: 2,
            idle_level: false,
            inter_frame_slots: 1,
            frame_stop_slots: 1,
            intensity_width: 8,
            min_frame_duration,
        }
    }

    fn engine() -> (PixelEncodingEngine<MockPulseTrain>, Rc<RefCell<RingState>>) {
        let state = Rc::new(RefCell::new(RingState::default()));
        let mut engine = PixelEncodingEngine::new(Ok(MockPulseTrain {
            state: Rc::clone(&state),
        }));
        engine.begin(config(Duration::from_millis(0))).unwrap();
        (engine, state)
    }

    fn play(
        engine: &mut PixelEncodingEngine<MockPulseTrain>,
        state: &Rc<RefCell<RingState>>,
        source: &mut Bytes,
        frame: &[u8],
    ) {
        drain_pulse_train(state, |event| engine.on_interrupt(event, source, frame));
    }

    #[test]
    fn test_begin_configures_refill_threshold() {
        let (_, state) = engine();
        let config = state.borrow().config.unwrap();
        assert_eq!(config.refill_threshold, RING_LEN * 3 / 4);
        assert_eq!(config.clock_divider, 2);
        assert_eq!(config.tick_ns(), 25);
    }

    #[test]
    fn test_frame_larger_than_ring_is_refilled() {
        let (mut engine, state) = engine();
        let frame = [0xFF, 0x00, 0x81, 0x12, 0x34, 0x56, 0xA5, 0x5A, 0x0F];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        assert_eq!(engine.state(), TransmissionState::Draining);
        assert!(state.borrow().buffer_low);

        play(&mut engine, &state, &mut source, &frame);

        let table = PulseTable::clockless(&TIMING, false, 25);
        let state = state.borrow();
        assert_eq!(state.starts, 1);
        assert_eq!(
            decode_bytes(&state.sent, table.data.lookup(1), table.data.lookup(0)),
            frame.to_vec()
        );
        // gap + data bits + stop
        assert_eq!(state.sent.len(), 1 + frame.len() * 8 + 1);
        assert_eq!(state.sent[0], table.inter_frame_gap);
        assert_eq!(state.sent[state.sent.len() - 1], table.frame_stop);

        assert_eq!(engine.state(), TransmissionState::FrameComplete);
        let stats = engine.stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.overruns, 0);
        assert_eq!(stats.incomplete_frames, 0);
        assert_eq!(stats.intensities_last_frame, frame.len() as u32);
    }

    #[test]
    fn test_framing_codes_surround_the_data() {
        let state = Rc::new(RefCell::new(RingState::default()));
        let mut engine = PixelEncodingEngine::new(Ok(MockPulseTrain {
            state: Rc::clone(&state),
        }));
        let start = PulseCode::new(true, 5, false, 5);
        let separator = PulseCode::new(false, 7, false, 7);
        let mut framed = config(Duration::from_millis(0));
        framed.table.frame_start = Some(start);
        framed.table.inter_intensity = Some(separator);
        engine.begin(framed).unwrap();

        let frame = [0x80, 0x01];
        let mut source = Bytes { position: 0 };
        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        play(&mut engine, &state, &mut source, &frame);

        let sent = state.borrow().sent.clone();
        assert_eq!(sent.len(), 1 + 1 + 2 * (8 + 1) + 1);
        assert_eq!(sent[0], framed.table.inter_frame_gap);
        assert_eq!(sent[1], start);
        assert_eq!(sent[10], separator);
        assert_eq!(sent[19], separator);
        assert_eq!(sent[20], framed.table.frame_stop);

        let data: Vec<_> = sent[2..10].iter().chain(&sent[11..19]).copied().collect();
        assert_eq!(
            decode_bytes(&data, framed.table.data.lookup(1), framed.table.data.lookup(0)),
            frame.to_vec()
        );
    }

    #[test]
    fn test_small_frame_fits_without_refill() {
        let (mut engine, state) = engine();
        let frame = [0x80, 0x01];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        assert!(!state.borrow().buffer_low);
        assert!(state.borrow().transmit_end);

        play(&mut engine, &state, &mut source, &frame);

        let table = PulseTable::clockless(&TIMING, false, 25);
        let sent = state.borrow().sent.clone();
        assert_eq!(decode_bytes(&sent, table.data.lookup(1), table.data.lookup(0)), vec![0x80, 0x01]);
        assert_eq!(engine.state(), TransmissionState::FrameComplete);
    }

    #[test]
    fn test_render_while_draining_is_dropped() {
        let (mut engine, state) = engine();
        let frame = [0x55; 12];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        assert!(!engine.render(Instant::from_millis(1), &mut source, &frame));

        assert_eq!(state.borrow().starts, 1);
        assert_eq!(engine.stats().frames, 1);
        assert_eq!(engine.stats().dropped_frames, 1);

        play(&mut engine, &state, &mut source, &frame);
        assert!(engine.render(Instant::from_millis(2), &mut source, &frame));
        assert_eq!(state.borrow().starts, 2);
    }

    #[test]
    fn test_min_frame_duration_paces_frames() {
        let state = Rc::new(RefCell::new(RingState::default()));
        let mut engine = PixelEncodingEngine::new(Ok(MockPulseTrain {
            state: Rc::clone(&state),
        }));
        engine.begin(config(Duration::from_millis(10))).unwrap();
        let frame = [0x01];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        play(&mut engine, &state, &mut source, &frame);

        assert!(!engine.render(Instant::from_millis(5), &mut source, &frame));
        assert_eq!(engine.stats().dropped_frames, 1);
        assert!(engine.render(Instant::from_millis(10), &mut source, &frame));
        assert_eq!(engine.min_frame_duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_poll_retires_frame_after_min_duration() {
        let state = Rc::new(RefCell::new(RingState::default()));
        let mut engine = PixelEncodingEngine::new(Ok(MockPulseTrain {
            state: Rc::clone(&state),
        }));
        engine.begin(config(Duration::from_millis(10))).unwrap();
        let frame = [0x01];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        play(&mut engine, &state, &mut source, &frame);

        engine.poll(Instant::from_millis(5));
        assert_eq!(engine.state(), TransmissionState::FrameComplete);
        engine.poll(Instant::from_millis(10));
        assert_eq!(engine.state(), TransmissionState::Idle);
    }

    #[test]
    fn test_paused_engine_starts_nothing() {
        let (mut engine, state) = engine();
        let mut source = Bytes { position: 0 };

        engine.pause(true);
        assert!(!engine.render(Instant::from_millis(0), &mut source, &[1, 2, 3]));
        assert_eq!(state.borrow().starts, 0);
        assert_eq!(engine.stats().dropped_frames, 0);

        engine.pause(false);
        assert!(engine.render(Instant::from_millis(0), &mut source, &[1, 2, 3]));
    }

    #[test]
    fn test_rejected_configuration_disables_engine() {
        let state = Rc::new(RefCell::new(RingState {
            reject_config: true,
            ..RingState::default()
        }));
        let mut engine = PixelEncodingEngine::new(Ok(MockPulseTrain {
            state: Rc::clone(&state),
        }));
        assert_eq!(
            engine.begin(config(Duration::from_millis(0))),
            Err(HardwareError::ConfigurationRejected)
        );

        let mut source = Bytes { position: 0 };
        assert!(!engine.render(Instant::from_millis(0), &mut source, &[1, 2, 3]));
        assert_eq!(state.borrow().starts, 0);
        assert_eq!(engine.failure(), Some(HardwareError::ConfigurationRejected));
    }

    #[test]
    fn test_missing_unit_is_reported() {
        let mut engine: PixelEncodingEngine<MockPulseTrain> =
            PixelEncodingEngine::new(Err(HardwareError::Unavailable(3)));
        assert_eq!(
            engine.begin(config(Duration::from_millis(0))),
            Err(HardwareError::Unavailable(3))
        );
        let mut source = Bytes { position: 0 };
        assert!(!engine.render(Instant::from_millis(0), &mut source, &[1]));
    }

    #[test]
    fn test_early_transmit_end_counts_incomplete_frame() {
        let (mut engine, _state) = engine();
        let frame = [0xAA; 16];
        let mut source = Bytes { position: 0 };

        assert!(engine.render(Instant::from_millis(0), &mut source, &frame));
        engine.on_interrupt(InterruptEvent::TransmitEnd, &mut source, &frame);

        assert_eq!(engine.stats().incomplete_frames, 1);
        assert_eq!(engine.state(), TransmissionState::FrameComplete);
    }

    #[test]
    fn test_error_interrupt_is_counted() {
        let (mut engine, _state) = engine();
        let mut source = Bytes { position: 0 };
        engine.on_interrupt(InterruptEvent::Error, &mut source, &[]);
        assert_eq!(engine.stats().hardware_errors, 1);
    }
}
