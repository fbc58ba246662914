use std::fmt;

use crate::dictionary::StringTable;
use crate::error::{Error, Result};

/// Counts and scores of one label
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LabelScore {
    /// Items where the prediction and the reference agree on this label
    pub num_correct: u32,
    /// Items predicted as this label
    pub num_model: u32,
    /// Items whose reference is this label
    pub num_observation: u32,
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

/// Label-wise and sequence-wise accuracy of predicted label sequences.
///
/// Label id `num_labels` stands for labels unknown to the model; it is
/// reported but kept out of the macro averages.
#[derive(Debug, Clone)]
pub struct Evaluation {
    num_labels: usize,
    tbl: Vec<LabelScore>,
    pub item_total_correct: u32,
    pub item_total_num: u32,
    pub item_accuracy: f64,
    pub inst_total_correct: u32,
    pub inst_total_num: u32,
    pub inst_accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_fmeasure: f64,
}

impl Evaluation {
    pub fn new(num_labels: usize) -> Self {
        Self {
            num_labels,
            tbl: vec![LabelScore::default(); num_labels + 1],
            item_total_correct: 0,
            item_total_num: 0,
            item_accuracy: 0.0,
            inst_total_correct: 0,
            inst_total_num: 0,
            inst_accuracy: 0.0,
            macro_precision: 0.0,
            macro_recall: 0.0,
            macro_fmeasure: 0.0,
        }
    }

    /// Clear every counter
    pub fn clear(&mut self) {
        *self = Self::new(self.num_labels);
    }

    /// Add one sequence pair to the counts.
    pub fn accumulate(&mut self, reference: &[u32], prediction: &[u32]) -> Result<()> {
        if reference.len() != prediction.len() {
            return Err(Error::InvalidInput(
                "reference and prediction must have the same length".to_string(),
            ));
        }
        if let Some(bad) = reference
            .iter()
            .chain(prediction)
            .find(|&&l| l as usize > self.num_labels)
        {
            return Err(Error::InternalLogic(format!("label id {} out of range", bad)));
        }

        let mut num_correct = 0;
        for (&lr, &lt) in reference.iter().zip(prediction) {
            self.tbl[lr as usize].num_observation += 1;
            self.tbl[lt as usize].num_model += 1;
            if lr == lt {
                self.tbl[lr as usize].num_correct += 1;
                num_correct += 1;
            }
            self.item_total_num += 1;
        }
        if num_correct == reference.len() {
            self.inst_total_correct += 1;
        }
        self.inst_total_num += 1;
        Ok(())
    }

    /// Compute precision, recall, F1 and the accuracies from the counts.
    pub fn finalize(&mut self) {
        self.item_total_correct = 0;
        self.macro_precision = 0.0;
        self.macro_recall = 0.0;
        self.macro_fmeasure = 0.0;

        for (i, lev) in self.tbl.iter_mut().enumerate() {
            // labels absent from the reference are not scored
            if lev.num_observation == 0 {
                continue;
            }
            self.item_total_correct += lev.num_correct;

            lev.precision = 0.0;
            lev.recall = 0.0;
            lev.fmeasure = 0.0;
            if lev.num_model > 0 {
                lev.precision = f64::from(lev.num_correct) / f64::from(lev.num_model);
            }
            lev.recall = f64::from(lev.num_correct) / f64::from(lev.num_observation);
            if lev.precision + lev.recall > 0.0 {
                lev.fmeasure = lev.precision * lev.recall * 2.0 / (lev.precision + lev.recall);
            }

            if i != self.num_labels {
                self.macro_precision += lev.precision;
                self.macro_recall += lev.recall;
                self.macro_fmeasure += lev.fmeasure;
            }
        }

        if self.num_labels > 0 {
            let n = self.num_labels as f64;
            self.macro_precision /= n;
            self.macro_recall /= n;
            self.macro_fmeasure /= n;
        }

        self.item_accuracy = 0.0;
        if self.item_total_num > 0 {
            self.item_accuracy = f64::from(self.item_total_correct) / f64::from(self.item_total_num);
        }
        self.inst_accuracy = 0.0;
        if self.inst_total_num > 0 {
            self.inst_accuracy = f64::from(self.inst_total_correct) / f64::from(self.inst_total_num);
        }
    }

    /// Scores of label `lid`; `num_labels` gives the unknown-label row.
    pub fn label(&self, lid: usize) -> Option<&LabelScore> {
        self.tbl.get(lid)
    }

    /// A printable report naming labels through `labels`
    pub fn report<'e>(&'e self, labels: &'e dyn StringTable) -> Report<'e> {
        Report { eval: self, labels }
    }
}

/// Display adapter returned by [`Evaluation::report`]
pub struct Report<'e> {
    eval: &'e Evaluation,
    labels: &'e dyn StringTable,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let eval = self.eval;
        writeln!(
            f,
            "Performance by label (#match, #model, #ref) (precision, recall, F1):"
        )?;
        for (i, lev) in eval.tbl.iter().enumerate().take(eval.num_labels) {
            let name = self.labels.to_str(i as u32).unwrap_or("[UNKNOWN]");
            if lev.num_observation == 0 {
                writeln!(
                    f,
                    "    {}: ({}, {}, {}) (******, ******, ******)",
                    name, lev.num_correct, lev.num_model, lev.num_observation
                )?;
            } else {
                writeln!(
                    f,
                    "    {}: ({}, {}, {}) ({:.4}, {:.4}, {:.4})",
                    name,
                    lev.num_correct,
                    lev.num_model,
                    lev.num_observation,
                    lev.precision,
                    lev.recall,
                    lev.fmeasure
                )?;
            }
        }
        writeln!(
            f,
            "Macro-average precision, recall, F1: ({:.6}, {:.6}, {:.6})",
            eval.macro_precision, eval.macro_recall, eval.macro_fmeasure
        )?;
        writeln!(
            f,
            "Item accuracy: {} / {} ({:.4})",
            eval.item_total_correct, eval.item_total_num, eval.item_accuracy
        )?;
        write!(
            f,
            "Instance accuracy: {} / {} ({:.4})",
            eval.inst_total_correct, eval.inst_total_num, eval.inst_accuracy
        )
    }
}
