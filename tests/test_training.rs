use std::sync::{Arc, Mutex};

use lincrf::train::{Algorithm, Trainer};
use lincrf::{Attribute, Error, FeatureType, Model};

fn weather() -> (Vec<Vec<Attribute>>, Vec<&'static str>) {
    let xseq = vec![
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("walk", 1.0), Attribute::new("clean", 0.5)],
        vec![Attribute::new("shop", 0.5), Attribute::new("clean", 0.5)],
        vec![Attribute::new("walk", 0.5), Attribute::new("clean", 1.0)],
        vec![Attribute::new("clean", 1.0), Attribute::new("shop", 0.1)],
        vec![Attribute::new("walk", 1.0), Attribute::new("shop", 0.5)],
        vec![],
        vec![Attribute::new("clean", 1.0)],
    ];
    let yseq = vec![
        "sunny", "sunny", "sunny", "rainy", "rainy", "rainy", "sunny", "sunny", "rainy",
    ];
    (xseq, yseq)
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn count_features(model: &Model<'_>, ftype: FeatureType) -> usize {
    model
        .features()
        .map(|f| f.unwrap())
        .filter(|f| f.ftype == ftype)
        .count()
}

#[test]
fn test_basic_training() {
    init_logger();
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(true);
    trainer.select(Algorithm::LBFGS).unwrap();
    trainer.append(&xseq, &yseq).unwrap();
    assert_eq!(trainer.len(), 1);

    trainer.set("c1", "0.0").unwrap();
    trainer.set("c2", "1.0").unwrap();
    trainer.set("max_iterations", "50").unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    match trainer.train(temp_file.path()) {
        Ok(_) => assert!(temp_file.path().exists()),
        Err(e) => panic!("Training failed: {}", e),
    }
}

#[test]
fn test_trainer_params() {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::LBFGS).unwrap();

    trainer.set("c1", "0.5").unwrap();
    trainer.set("c2", "2.0").unwrap();
    trainer.set("max_iterations", "100").unwrap();

    assert_eq!(trainer.get("c1").unwrap(), "0.5");
    assert_eq!(trainer.get("c2").unwrap(), "2");
    assert_eq!(trainer.get("max_iterations").unwrap(), "100");
    assert_eq!(trainer.get("linesearch").unwrap(), "MoreThuente");
}

#[test]
fn test_trainer_validation() {
    let mut trainer = Trainer::new(false);
    let temp_file = tempfile::NamedTempFile::new().unwrap();

    // no algorithm
    let result = trainer.train(temp_file.path());
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    // no training data
    trainer.select(Algorithm::LBFGS).unwrap();
    let result = trainer.train(temp_file.path());
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_label_length_mismatch() {
    let mut trainer = Trainer::new(false);
    let xseq = vec![vec![Attribute::new("a", 1.0)]];
    assert!(trainer.append(&xseq, &["X", "Y"]).is_err());
    assert!(trainer.is_empty());
}

#[test]
fn test_clear() {
    let (xseq, yseq) = weather();
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::AP).unwrap();
    trainer.append(&xseq, &yseq).unwrap();
    trainer.append(&xseq, &yseq).unwrap();
    assert_eq!(trainer.len(), 2);

    trainer.clear();
    assert!(trainer.is_empty());
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    assert!(trainer.train(temp_file.path()).is_err());
}

#[test]
fn test_possible_features() {
    let (xseq, yseq) = weather();

    let train = |settings: &[(&str, &str)]| -> Vec<u8> {
        let mut trainer = Trainer::new(false);
        trainer.select(Algorithm::LBFGS).unwrap();
        trainer.set("max_iterations", "5").unwrap();
        for (name, value) in settings {
            trainer.set(name, value).unwrap();
        }
        trainer.append(&xseq, &yseq).unwrap();
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        trainer.train(temp_file.path()).unwrap();
        std::fs::read(temp_file.path()).unwrap()
    };

    // every attribute co-occurs with both labels
    let data = train(&[]);
    let model = Model::new(&data).unwrap();
    assert_eq!(count_features(&model, FeatureType::State), 6);

    let data = train(&[
        ("feature.possible_states", "1"),
        ("feature.possible_transitions", "1"),
    ]);
    let model = Model::new(&data).unwrap();
    assert_eq!(count_features(&model, FeatureType::State), 6);
    assert_eq!(count_features(&model, FeatureType::Transition), 4);
}

#[test]
fn test_minfreq_prunes_rare_features() {
    let xseq = vec![
        vec![Attribute::new("common", 1.0)],
        vec![Attribute::new("common", 1.0)],
        vec![Attribute::new("rare", 1.0)],
    ];
    let yseq = ["X", "X", "Y"];

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::LBFGS).unwrap();
    trainer.set("feature.minfreq", "2").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let data = std::fs::read(temp_file.path()).unwrap();
    let model = Model::new(&data).unwrap();
    let attrs: Vec<&str> = model
        .features()
        .map(|f| f.unwrap())
        .filter(|f| f.ftype == FeatureType::State)
        .map(|f| model.to_attr(f.src).unwrap())
        .collect();
    assert_eq!(attrs, vec!["common"]);
}

#[test]
fn test_message_callback_receives_progress() {
    let (xseq, yseq) = weather();
    let messages = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut trainer = Trainer::new(false);
    let sink = Arc::clone(&messages);
    trainer.set_message_callback(move |msg| sink.lock().unwrap().push(msg.to_string()));
    trainer.select(Algorithm::LBFGS).unwrap();
    trainer.set("max_iterations", "3").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m == "Training with lbfgs"));
    assert!(messages.iter().any(|m| m == "Number of instances: 1"));
    assert!(messages.iter().any(|m| m == "Number of labels: 2"));
    assert!(messages.iter().any(|m| m.starts_with("***** Iteration #1 *****")));
    assert!(messages.iter().any(|m| m.starts_with("Total seconds required:")));
}
