mod tests {
    use myrtio_coil_driver::{OutputRegister, PortState, RegisterError, SharedRegister};

    type Register = OutputRegister<24, 4>;

    #[test]
    fn test_push_and_pull_are_lifo() {
        let mut register = Register::new();
        assert_eq!(register.push_port(3, 200, true), Ok(1));
        assert_eq!(register.push_port(3, 100, true), Ok(2));
        assert_eq!(
            register.get_port(3),
            Ok(PortState {
                users: 2,
                value: 100,
                enable: true
            })
        );

        let popped = register.pull_port(3).unwrap();
        assert_eq!(
            popped,
            PortState {
                users: 2,
                value: 100,
                enable: true
            }
        );
        assert_eq!(register.read_user(3), Ok(1));
        assert_eq!(register.read_value(3), Ok(200));
    }

    #[test]
    fn test_pull_empty_port_is_idle() {
        let mut register = Register::new();
        assert_eq!(register.pull_port(0), Ok(PortState::IDLE));
        assert_eq!(register.read_user(0), Ok(0));
        assert!(register.get_port(0).unwrap().is_idle());
    }

    #[test]
    fn test_push_rejects_without_mutation() {
        let mut register = Register::new();
        assert_eq!(register.push_port(1, 256, true), Err(RegisterError::OutOfRange));
        assert_eq!(register.push_port(1, -1, true), Err(RegisterError::OutOfRange));
        assert_eq!(register.read_user(1), Ok(0));

        for _ in 0..4 {
            register.push_port(1, 10, false).unwrap();
        }
        assert_eq!(register.push_port(1, 20, true), Err(RegisterError::Full));
        assert_eq!(register.read_user(1), Ok(4));
        assert_eq!(register.read_value(1), Ok(10));
    }

    #[test]
    fn test_invalid_port() {
        let mut register = Register::new();
        assert_eq!(register.push_port(24, 1, true), Err(RegisterError::InvalidPort));
        assert_eq!(register.pull_port(24), Err(RegisterError::InvalidPort));
        assert_eq!(register.get_port(100), Err(RegisterError::InvalidPort));
        assert_eq!(register.reset_port(24), Err(RegisterError::InvalidPort));
    }

    #[test]
    fn test_write_top_slot() {
        let mut register = Register::new();
        assert_eq!(register.write_value(2, 50), Err(RegisterError::Empty));

        register.push_port(2, 10, true).unwrap();
        assert_eq!(register.write_value(2, 50), Ok(50));
        assert_eq!(register.write_enable(2, false), Ok(false));
        assert_eq!(register.read_slot(2, 1), Ok((50, false)));

        for _ in 0..3 {
            register.increase_user(2).unwrap();
        }
        assert_eq!(register.write_value(2, 70), Err(RegisterError::Full));
        assert_eq!(register.read_slot(2, 4), Ok((0, false)));
        assert_eq!(register.read_slot(2, 5), Err(RegisterError::Empty));
    }

    #[test]
    fn test_decrease_user_then_clean() {
        let mut register = Register::new();
        register.push_port(5, 10, true).unwrap();
        register.push_port(5, 20, true).unwrap();
        assert_eq!(register.decrease_user(5), Ok(1));
        assert_eq!(register.read_value(5), Ok(10));
        assert_eq!(register.clean_values(5), Ok(1));
        assert_eq!(register.decrease_user(5), Ok(0));
        assert_eq!(register.decrease_user(5), Err(RegisterError::Empty));
        assert_eq!(register.read_value(5), Err(RegisterError::Empty));
        assert_eq!(register.read_enable(5), Err(RegisterError::Empty));
    }

    #[test]
    fn test_output_enable_scalars() {
        let mut register = Register::new();
        assert_eq!(register.read_oe_ratio(), 0.0);
        assert_eq!(register.read_oe_period(), 1.0);

        assert_eq!(register.write_oe_ratio(0.75), Ok(0.75));
        assert_eq!(register.write_oe_ratio(-0.1), Err(RegisterError::OutOfRange));
        assert_eq!(register.write_oe_period(f32::NAN), Err(RegisterError::OutOfRange));
        assert_eq!(register.write_oe_period(2.0), Ok(2.0));
        assert_eq!(register.read_oe_ratio(), 0.75);

        register.push_port(0, 1, true).unwrap();
        register.reset_all();
        assert_eq!(register.read_oe_ratio(), 0.0);
        assert_eq!(register.read_oe_period(), 1.0);
        assert_eq!(register.read_user(0), Ok(0));
    }

    #[test]
    fn test_set_all_skips_full_ports() {
        let mut register = OutputRegister::<3, 1>::new();
        register.push_port(1, 9, true).unwrap();

        let counts = register.set_all(&[Some((5, true)), Some((6, true)), None]);
        assert_eq!(counts, [1, 1, 0]);
        let states = register.get_all();
        assert_eq!(states[0].value, 5);
        assert_eq!(states[1].value, 9);
        assert!(states[2].is_idle());
    }

    #[test]
    fn test_claim_token_goes_stale() {
        let mut register = Register::new();
        register.push_port(7, 255, true).unwrap();
        let token = register.claim_top(7).unwrap();
        assert_eq!(token.port(), 7);
        assert_eq!(token.depth(), 1);
        assert_eq!(register.retune(token, 230).map(|state| state.value), Ok(230));

        register.push_port(7, 100, true).unwrap();
        assert_eq!(register.retune(token, 200), Err(RegisterError::Stale));

        register.pull_port(7).unwrap();
        assert!(register.retune(token, 200).is_ok());

        register.pull_port(7).unwrap();
        register.push_port(7, 255, true).unwrap();
        assert_eq!(register.retune(token, 200), Err(RegisterError::Stale));
        assert_eq!(register.read_value(7), Ok(255));
    }

    #[test]
    fn test_claim_top_of_empty_port() {
        let register = Register::new();
        assert_eq!(register.claim_top(0), Err(RegisterError::Empty));
    }

    #[test]
    fn test_shared_register_transaction() {
        let shared: SharedRegister<24, 4> = SharedRegister::new();
        let token = shared
            .lock(|register| {
                register.push_port(1, 40, true)?;
                register.claim_top(1)
            })
            .unwrap();
        assert_eq!(token.depth(), 1);
        assert_eq!(shared.get_port(1).unwrap().value, 40);
        assert_eq!(shared.get_all()[1].users, 1);
    }

    #[test]
    fn test_push_then_pull_round_trip() {
        let mut register = Register::new();
        register.push_port(9, 42, true).unwrap();
        assert_eq!(
            register.pull_port(9),
            Ok(PortState {
                users: 1,
                value: 42,
                enable: true
            })
        );
        assert!(register.get_port(9).unwrap().is_idle());
    }

    #[test]
    fn test_pull_empty_port_leaves_state() {
        let mut register = Register::new();
        register.write_oe_ratio(0.3).unwrap();
        register.write_oe_period(0.5).unwrap();
        register.push_port(4, 80, true).unwrap();
        register.pull_port(4).unwrap();

        assert_eq!(register.pull_port(4), Ok(PortState::IDLE));
        assert_eq!(register.read_slot(4, 1), Err(RegisterError::Empty));
        assert_eq!(register.read_user(4), Ok(0));
        assert_eq!(register.read_oe_ratio(), 0.3);
        assert_eq!(register.read_oe_period(), 0.5);
    }

    #[test]
    fn test_shared_register_across_threads() {
        let shared: SharedRegister<24, 4> = SharedRegister::new();
        std::thread::scope(|scope| {
            for value in [10, 20] {
                let shared = &shared;
                scope.spawn(move || {
                    for _ in 0..500 {
                        shared.lock(|register| register.push_port(0, value, true)).unwrap();
                        shared.lock(|register| register.pull_port(0)).unwrap();
                    }
                    shared.lock(|register| register.push_port(0, value, true)).unwrap();
                });
            }
        });
        assert_eq!(shared.get_port(0).unwrap().users, 2);
    }
}
