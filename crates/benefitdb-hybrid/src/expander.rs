//! Domain keyword expansion for retrieval queries.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionRule {
    pub trigger: String,
    pub related: Vec<String>,
}

impl ExpansionRule {
    pub fn new(trigger: &str, related: &[&str]) -> Self {
        Self { trigger: trigger.to_string(), related: related.iter().map(|s| s.to_string()).collect() }
    }
}

/// Ordered trigger table. Matching is by substring, case-sensitive.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    rules: Vec<ExpansionRule>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(vec![
            ExpansionRule::new("뇌동맥", &["뇌동맥류", "비파열성", "Flow-diverter", "색전술"]),
            ExpansionRule::new("뇌", &["뇌동맥", "뇌혈관", "뇌동맥류"]),
            ExpansionRule::new("관상동맥", &["LM", "LAD", "LCx", "RCA", "경피적"]),
            ExpansionRule::new("심장", &["관상동맥", "LM", "LAD"]),
            ExpansionRule::new("스텐트", &["삽입술", "경피적"]),
            ExpansionRule::new("병변", &["협착", "병변부위"]),
            ExpansionRule::new("확장술", &["혈관성형술", "PTC", "PTCA"]),
            ExpansionRule::new("죽상반", &["atherectomy", "죽상반절제술"]),
            ExpansionRule::new("cross-over", &["걸쳐서", "병변"]),
            ExpansionRule::new("삭감", &["급여", "인정기준", "요양급여"]),
            ExpansionRule::new("청구", &["수가", "산정", "소정점수"]),
            ExpansionRule::new("수가산정", &["단일혈관", "추가혈관", "소정점수"]),
        ])
    }
}

impl QueryExpander {
    pub fn new(rules: Vec<ExpansionRule>) -> Self {
        Self { rules }
    }

    /// Appends the related terms of every trigger found in `query`, skipping
    /// terms the query already contains. Each term is appended at most once.
    ///
    /// Expanding an already expanded query can add more terms; call once.
    pub fn expand(&self, query: &str) -> String {
        let mut added: Vec<&str> = Vec::new();
        for rule in self.rules.iter().filter(|r| query.contains(r.trigger.as_str())) {
            for term in &rule.related {
                if !query.contains(term.as_str()) && !added.contains(&term.as_str()) {
                    added.push(term);
                }
            }
        }
        if added.is_empty() {
            return query.to_string();
        }
        format!("{query} {}", added.join(" "))
    }
}
