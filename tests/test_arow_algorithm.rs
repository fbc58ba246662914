use lincrf::{Algorithm, Attribute, Model, Trainer};

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

#[test]
fn test_arow_basic_training() {
    let (xseq, yseq) = weather();

    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::AROW).unwrap();
    trainer.set_shuffle_seed(Some(1));
    trainer.set("variance", "1.0").unwrap();
    trainer.set("gamma", "1.0").unwrap();
    trainer.set("max_iterations", "50").unwrap();
    trainer.append(&xseq, &yseq).unwrap();

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let model_data = std::fs::read(temp_file.path()).unwrap();
    let model = Model::new(&model_data).unwrap();
    let mut tagger = model.tagger().unwrap();
    let predicted = tagger.tag(&xseq).unwrap();

    let correct = predicted.iter().zip(yseq.iter()).filter(|(p, t)| p == t).count();
    let accuracy = correct as f64 / yseq.len() as f64;
    println!("AROW Accuracy: {:.2}%", accuracy * 100.0);
    assert!(accuracy > 0.5, "AROW accuracy too low");
}

#[test]
fn test_arow_multiple_sequences() {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::AROW).unwrap();
    trainer.set_shuffle_seed(Some(1));
    trainer.set("max_iterations", "30").unwrap();

    let sequences = [
        (["a", "b", "a"], ["X", "Y", "X"]),
        (["b", "a", "b"], ["Y", "X", "Y"]),
        (["a", "a", "b"], ["X", "X", "Y"]),
    ];
    for (attrs, labels) in &sequences {
        let xseq: Vec<Vec<Attribute>> = attrs.iter().map(|a| vec![Attribute::new(*a, 1.0)]).collect();
        trainer.append(&xseq, labels).unwrap();
    }

    let temp_file = tempfile::NamedTempFile::new().unwrap();
    trainer.train(temp_file.path()).unwrap();

    let model_data = std::fs::read(temp_file.path()).unwrap();
    let model = Model::new(&model_data).unwrap();
    let mut tagger = model.tagger().unwrap();
    for (attrs, labels) in &sequences {
        let xseq: Vec<Vec<Attribute>> = attrs.iter().map(|a| vec![Attribute::new(*a, 1.0)]).collect();
        assert_eq!(tagger.tag(&xseq).unwrap(), labels.to_vec());
    }
}

#[test]
fn test_arow_parameter_validation() {
    let mut trainer = Trainer::new(false);
    trainer.select(Algorithm::AROW).unwrap();

    assert_eq!(
        trainer.set("variance", "0").unwrap_err().to_string(),
        "variance must be positive"
    );
    assert_eq!(
        trainer.set("gamma", "-1").unwrap_err().to_string(),
        "gamma must be positive"
    );
    assert!(trainer.set("variance", "0.5").is_ok());
    assert_eq!(trainer.get("variance").unwrap(), "0.5");
    assert!(!trainer.help("gamma").unwrap().is_empty());
}
