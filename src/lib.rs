//! Pure Rust implementation of linear-chain Conditional Random Fields (CRF)
//!
//! This library provides both training and prediction capabilities for
//! linear-chain CRFs, reading and writing models in the CRFsuite format.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use lincrf::train::{Algorithm, Trainer};
//! use lincrf::Attribute;
//!
//! let mut trainer = Trainer::new(true);
//! trainer.select(Algorithm::LBFGS)?;
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let yseq = vec!["sunny", "rainy"];
//! trainer.append(&xseq, &yseq)?;
//!
//! trainer.set("c2", "1.0")?;
//! trainer.train("model.crfsuite")?;
//! # Ok::<(), lincrf::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! use lincrf::{Attribute, Model};
//!
//! let model_data = std::fs::read("model.crfsuite")?;
//! let model = Model::new(&model_data)?;
//! let mut tagger = model.tagger()?;
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let result = tagger.tag(&xseq)?;
//! # Ok::<(), lincrf::Error>(())
//! ```

mod attribute;
mod context;
pub mod dataset;
mod dictionary;
mod error;
mod evaluation;
mod feature;
mod model;
mod tagger;

/// Training module containing all components for training CRF models
pub mod train;

// Re-export main types
pub use self::attribute::Attribute;
pub use self::context::{Context, Flag, Reset};
pub use self::dictionary::{Dictionary, StringTable};
pub use self::error::{Error, Result};
pub use self::evaluation::{Evaluation, LabelScore, Report};
pub use self::feature::{Feature, FeatureRefs, FeatureType};
pub use self::model::{Model, ModelTable};
pub use self::tagger::{tag_parallel, Tagger};

// Re-export training types for convenience
pub use self::train::{Algorithm, Trainer};
