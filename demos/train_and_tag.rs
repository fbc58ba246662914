use lincrf::train::{Algorithm, Trainer};
use lincrf::{Attribute, Model};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("CRF Training and Tagging Example");
    println!("=================================\n");

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

    println!("Training data:");
    println!("  Sequence length: {}", xseq.len());
    println!("  Labels: {:?}\n", yseq);

    let algorithm: Algorithm = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "lbfgs".to_string())
        .parse()?;

    println!("Creating trainer ({})...", algorithm);
    let mut trainer = Trainer::new(true);
    trainer.select(algorithm)?;
    trainer.set_shuffle_seed(Some(0));
    trainer.append(&xseq, &yseq)?;

    println!("Parameters:");
    for name in trainer.params().names() {
        println!("  {} = {}  ({})", name, trainer.get(name)?, trainer.help(name)?);
    }
    println!();

    let model_path = std::env::temp_dir().join("example_model.crfsuite");
    println!("Training model...\n");
    trainer.train(&model_path)?;

    println!("\n=================================");
    println!("Training completed successfully!");
    println!("=================================\n");

    let model_data = std::fs::read(&model_path)?;
    let model = Model::new(&model_data)?;
    let mut tagger = model.tagger()?;

    let test_seq = vec![
        vec![Attribute::new("walk", 1.0)],
        vec![Attribute::new("shop", 1.0)],
        vec![Attribute::new("clean", 1.0)],
    ];

    let result = tagger.tag(&test_seq)?;
    println!("  Input: walk -> shop -> clean");
    println!("  Predicted labels: {:?}", result);
    println!("  Probability: {:.4}", tagger.probability(&result)?);
    for (t, label) in result.iter().enumerate() {
        println!("  P({} at {}) = {:.4}", label, t, tagger.marginal(label, t)?);
    }

    println!("\nModel dump:");
    let stdout = std::io::stdout();
    model.dump(&mut stdout.lock())?;

    Ok(())
}
