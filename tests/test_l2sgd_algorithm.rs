use std::sync::{Arc, Mutex};

use lincrf::{Algorithm, Attribute, Error, Model, Trainer};

fn weather() -> (Vec<Vec<Attribute>>, Vec<&'static str>) {
    let xseq = vec![
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("walk", 1.0), Attribute::new("clean", 0.5)],
        vec![Attribute::new("shop", 0.5), Attribute::new("clean", 0.5)],
        vec![Attribute::new("walk", 0.5), Attribute::new("clean", 1.0)],
        vec![Attribute::new("clean", 1.0), Attribute::new("shop", 0.1)],
    ];
    let yseq = vec!["sunny", "sunny", "sunny", "rainy", "rainy", "rainy"];
    (xseq, yseq)
}

fn accuracy(model_path: &std::path::Path, xseq: &[Vec<Attribute>], yseq: &[&str]) -> f64 {
    let model_data = std::fs::read(model_path).unwrap();
    let model = Model::new(&model_data).unwrap();
    let mut tagger = model.tagger().unwrap();
    let predicted = tagger.tag(xseq).unwrap();
    let correct = predicted.iter().zip(yseq.iter()).filter(|(p, t)| p == t).count();
    correct as f64 / yseq.len() as f64
}

#[test]
fn test_l2sgd_basic_training() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2SGD).unwrap();
    trainer.set_shuffle_seed(Some(5));
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "50").unwrap();
    trainer.set("period", "10").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let accuracy = accuracy(temp_file.path(), &xseq, &yseq);
    println!("L2SGD Accuracy: {:.2}%", accuracy * 100.0);
    assert!(accuracy > 0.5, "L2SGD accuracy too low");
}

#[test]
fn test_l2sgd_calibration() {
    let xseq = vec![
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
        vec![Attribute::new("a", 1.0)],
        vec![Attribute::new("b", 1.0)],
    ];
    let yseq = ["X", "Y", "X", "Y"];
    let messages = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut trainer = Trainer::new(false);
    let sink = Arc::clone(&messages);
    trainer.set_message_callback(move |msg| sink.lock().unwrap().push(msg.to_string()));
    trainer.select(Algorithm::L2SGD).unwrap();
    trainer.set_shuffle_seed(Some(5));
    trainer.set("max_iterations", "20").unwrap();
    trainer.set("calibration.samples", "4").unwrap();
    trainer.set("calibration.candidates", "5").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let log = messages.lock().unwrap().join("\n");
    assert!(log.contains("Calibrating the learning rate (eta)"));
    assert!(log.contains("Best learning rate (eta):"));
    assert!(log.contains("***** Epoch #1 *****"));
    assert!(temp_file.path().exists());
}

#[test]
fn test_l2sgd_vs_lbfgs() {
    let (xseq, yseq) = weather();

    let mut l2sgd_trainer = Trainer::new(false);
    l2sgd_trainer.select(Algorithm::L2SGD).unwrap();
    l2sgd_trainer.set_shuffle_seed(Some(11));
    l2sgd_trainer.set("c2", "1.0").unwrap();
    l2sgd_trainer.set("max_iterations", "100").unwrap();
    l2sgd_trainer.append(&xseq, &yseq).unwrap();
    let l2sgd_file = tempfile::NamedTempFile::new().unwrap();
    l2sgd_trainer.train(l2sgd_file.path()).unwrap();

    let mut lbfgs_trainer = Trainer::new(false);
    lbfgs_trainer.select(Algorithm::LBFGS).unwrap();
    lbfgs_trainer.set("c1", "0.0").unwrap();
    lbfgs_trainer.set("c2", "1.0").unwrap();
    lbfgs_trainer.set("max_iterations", "100").unwrap();
    lbfgs_trainer.append(&xseq, &yseq).unwrap();
    let lbfgs_file = tempfile::NamedTempFile::new().unwrap();
    lbfgs_trainer.train(lbfgs_file.path()).unwrap();

    let l2sgd_accuracy = accuracy(l2sgd_file.path(), &xseq, &yseq);
    let lbfgs_accuracy = accuracy(lbfgs_file.path(), &xseq, &yseq);
    println!("L2SGD Accuracy: {:.2}%", l2sgd_accuracy * 100.0);
    println!("LBFGS Accuracy: {:.2}%", lbfgs_accuracy * 100.0);

    assert!(l2sgd_accuracy > 0.5, "L2SGD accuracy too low");
    assert!(lbfgs_accuracy > 0.7, "LBFGS accuracy too low");
}

#[test]
fn test_l2sgd_parameter_validation() {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2SGD).unwrap();

    assert!(trainer.set("c2", "1.0").is_ok());
    assert!(trainer.set("period", "10").is_ok());
    assert!(trainer.set("delta", "1e-5").is_ok());
    assert!(trainer.set("calibration.eta", "0.1").is_ok());
    assert!(trainer.set("calibration.rate", "2.0").is_ok());

    assert!(trainer.set("period", "0").is_err());
    assert!(trainer.set("calibration.eta", "0").is_err());
    assert!(trainer.set("calibration.samples", "0").is_err());
    assert!(trainer.set("c1", "1.0").is_err());
}

#[test]
fn test_l2sgd_requires_positive_c2() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2SGD).unwrap();
    trainer.set("c2", "0").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let err = trainer.train(temp_file.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));
    assert_eq!(err.to_string(), "c2 must be positive for SGD training");
}

#[test]
fn test_l2sgd_convergence() {
    let xseq: Vec<Vec<Attribute>> = (0..6)
        .map(|i| vec![Attribute::new(if i % 2 == 0 { "a" } else { "b" }, 1.0)])
        .collect();
    let yseq = ["X", "Y", "X", "Y", "X", "Y"];

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::L2SGD).unwrap();
    trainer.set_shuffle_seed(Some(5));
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "100").unwrap();
    trainer.set("period", "5").unwrap();
    trainer.set("delta", "1e-4").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let accuracy = accuracy(temp_file.path(), &xseq, &yseq);
    assert!(accuracy > 0.5, "L2SGD accuracy too low: {}", accuracy);
}
