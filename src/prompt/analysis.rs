use crate::paper::{EvolutionaryMechanism, EvolutionaryScale, ResearchMethod};
use crate::prompt::common::{option_list, DONT_TELL_ME, JSON_ONLY};

/// System message for per-paper analysis.
pub fn analysis_system_prompt() -> String {
    format!(
        r#"You are an expert evolutionary biologist who classifies new preprints and journal
articles for a daily research digest. You read the title and abstract carefully and
answer only with the requested JSON.
{dont_tell_me}"#,
        dont_tell_me = DONT_TELL_ME
    )
}

/// Builds the analysis prompt for one paper. The output depends only on its inputs.
pub fn analysis_prompt(title: &str, abstract_text: &str) -> String {
    format!(
        r#"Analyze the following evolutionary biology paper.

Title: {title}

Abstract:
~~~
{abstract_text}
~~~

Return this JSON structure:

```json
{{
  "taxa": "organism(s) studied, e.g. \"Drosophila melanogaster\" or \"Cichlidae\"",
  "evolutionary_scale": {scales},
  "research_method": {methods},
  "key_findings": ["finding 1", "finding 2", "finding 3"],
  "evolutionary_mechanism": {mechanisms},
  "importance_score": 0,
  "innovation_summary": "one or two sentences on what is new"
}}
```

Rules:
- "evolutionary_scale" must be exactly one of: {scales}
- "research_method" must be exactly one of: {methods}
- "evolutionary_mechanism" must be exactly one of: {mechanisms}
- "key_findings" lists 3 to 5 short findings, each a single sentence.
- "importance_score" is an integer from 0 to 100:
  - 90-100: paradigm-shifting, will change how the field thinks
  - 80-89: major advance, must read for specialists
  - 60-79: solid contribution with clear novelty
  - 40-59: incremental but useful
  - 0-39: limited novelty or narrow interest
- "innovation_summary" is 1 to 2 sentences.
- If the organism is not stated, use the most specific group you can infer.
{json_only}"#,
        title = title.trim(),
        abstract_text = abstract_text.trim(),
        scales = option_list(EvolutionaryScale::OPTIONS),
        methods = option_list(ResearchMethod::OPTIONS),
        mechanisms = option_list(EvolutionaryMechanism::OPTIONS),
        json_only = JSON_ONLY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_deterministic_and_complete() {
        let a = analysis_prompt("Finch beaks", "Beak depth responds to drought.");
        let b = analysis_prompt("Finch beaks", "Beak depth responds to drought.");
        assert_eq!(a, b);

        for option in EvolutionaryScale::OPTIONS
            .iter()
            .chain(ResearchMethod::OPTIONS)
            .chain(EvolutionaryMechanism::OPTIONS)
        {
            assert!(a.contains(option), "missing option {}", option);
        }
        assert!(a.contains("```json"));
        assert!(a.contains("3 to 5"));
        assert!(a.contains("Finch beaks"));
    }
}
