//! Clinical questions (CQs) used by weekly evidence extraction.

use serde::{Deserialize, Serialize};

/// A fixed clinical question with keyword hints for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ClinicalQuestion {
    pub fn new(id: &str, question: &str, keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            question: question.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Blood-purification questions from the Japanese sepsis guideline (section 4).
pub fn default_clinical_questions() -> Vec<ClinicalQuestion> {
    vec![
        ClinicalQuestion::new(
            "CQ4-1",
            "敗血症に対して，PMX-DHPを行うか?",
            &["PMX-DHP", "polymyxin B", "endotoxin adsorption", "polymyxin B-immobilized fiber", "トレミキシン"],
        ),
        ClinicalQuestion::new(
            "CQ4-2",
            "敗血症性AKIに対して，早期の腎代替療法を行うか?",
            &["early RRT", "early renal replacement therapy", "early dialysis", "early CRRT", "早期腎代替療法"],
        ),
        ClinicalQuestion::new(
            "CQ4-3",
            "敗血症性AKIに対する腎代替療法では持続的治療を行うか?",
            &["CRRT", "continuous renal replacement therapy", "continuous venovenous hemodiafiltration", "CVVHDF", "持続的腎代替療法"],
        ),
        ClinicalQuestion::new(
            "CQ4-4",
            "敗血症性AKIに対する腎代替療法において，血液浄化量の増加を行うか?",
            &["high-volume hemofiltration", "high-dose CRRT", "intensive renal support", "high-intensity CRRT", "高容量血液浄化"],
        ),
    ]
}
