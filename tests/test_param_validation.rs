use lincrf::train::{Algorithm, Trainer};
use lincrf::Error;

fn lbfgs() -> Trainer {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::LBFGS).unwrap();
    trainer
}

#[test]
fn test_c1_negative_validation() {
    let mut trainer = lbfgs();

    let result = trainer.set("c1", "-1.0");
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "c1 must be non-negative");

    assert!(trainer.set("c1", "0.0").is_ok());
    assert!(trainer.set("c1", "1.0").is_ok());
}

#[test]
fn test_c2_negative_validation() {
    let mut trainer = lbfgs();

    let result = trainer.set("c2", "-1.0");
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "c2 must be non-negative");

    assert!(trainer.set("c2", "0.0").is_ok());
    assert!(trainer.set("c2", "1.0").is_ok());
}

#[test]
fn test_epsilon_validation() {
    let mut trainer = lbfgs();

    assert!(trainer.set("epsilon", "0.0").is_ok());

    let result = trainer.set("epsilon", "-0.001");
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().to_string(),
        "epsilon must be non-negative"
    );

    assert!(trainer.set("epsilon", "0.001").is_ok());
    assert!(trainer.set("epsilon", "1e-5").is_ok());
}

#[test]
fn test_invalid_parameter_values() {
    let mut trainer = lbfgs();

    assert!(trainer.set("c1", "not_a_number").is_err());
    assert!(trainer.set("c2", "abc").is_err());
    assert!(trainer.set("epsilon", "xyz").is_err());
    assert!(trainer.set("num_memories", "not_an_int").is_err());
    assert!(trainer.set("max_iterations", "1.5").is_err());
    assert!(trainer.set("linesearch", "Armijo").is_err());
}

#[test]
fn test_rejected_value_is_not_stored() {
    let mut trainer = lbfgs();
    trainer.set("c2", "0.5").unwrap();
    assert!(trainer.set("c2", "-3").is_err());
    assert_eq!(trainer.get("c2").unwrap(), "0.5");
}

#[test]
fn test_unknown_parameter() {
    let mut trainer = lbfgs();

    let result = trainer.set("unknown_param", "1.0");
    assert!(matches!(result, Err(Error::UnknownParameter(_))));
    assert!(result.unwrap_err().to_string().contains("unknown parameter"));
    assert!(trainer.get("unknown_param").is_err());
    assert!(trainer.help("unknown_param").is_err());
}

#[test]
fn test_parameters_per_algorithm() {
    let cases: [(Algorithm, &[&str]); 5] = [
        (Algorithm::LBFGS, &["c1", "c2", "num_memories", "linesearch"]),
        (Algorithm::L2SGD, &["c2", "period", "calibration.eta"]),
        (Algorithm::AP, &["max_iterations", "epsilon"]),
        (Algorithm::PA, &["type", "c", "error_sensitive", "averaging"]),
        (Algorithm::AROW, &["variance", "gamma"]),
    ];
    for (algorithm, names) in cases {
        let mut trainer = Trainer::new(false);
        trainer.select(algorithm).unwrap();
        assert_eq!(trainer.algorithm(), Some(algorithm));
        for name in names.iter().chain(&["feature.minfreq", "feature.possible_states"]) {
            assert!(trainer.get(name).is_ok(), "{} lacks {}", algorithm, name);
            assert!(!trainer.help(name).unwrap().is_empty());
        }
        let listed: Vec<&str> = trainer.params().names().collect();
        assert_eq!(listed.len(), trainer.params().len());
    }
}
