use crate::prompt::common::{DONT_TELL_ME, JSON_ONLY};

pub fn report_system_prompt() -> String {
    format!(
        r#"You are the editor of a daily digest of evolutionary biology research. You spot
themes across papers, judge which work matters most, and write for working
evolutionary biologists.
{dont_tell_me}"#,
        dont_tell_me = DONT_TELL_ME
    )
}

/// Prompt for the daily deep report. `stats`, `clusters` and `papers` are JSON renderings
/// of the day's statistics, theme clusters and compact paper records.
pub fn report_prompt(report_date: &str, stats: &str, clusters: &str, papers: &str) -> String {
    format!(
        r#"Write the evolutionary biology research report for {report_date}.

Statistics:
~~~
{stats}
~~~

Papers grouped by taxa and research method:
~~~
{clusters}
~~~

Analyzed papers:
~~~
{papers}
~~~

Return this JSON structure:

```json
{{
  "research_summary": "3 to 5 sentences on the day's research",
  "hot_topics": [
    {{"topic": "name", "description": "why it matters", "paper_count": 2, "key_papers": [1, 2]}}
  ],
  "trend_analysis": {{
    "emerging_taxa": "organisms drawing new attention",
    "methodology_trends": "methods gaining ground",
    "cross_disciplinary_insights": "links to other fields"
  }},
  "recommended_papers": [
    {{"paper_id": 1, "title": "paper title", "reason": "why read it", "priority": "must_read"}}
  ],
  "forward_look": "what to watch next",
  "top_paper_ids": [1, 2, 3]
}}
```

Rules:
- Recommend 5 to 10 papers (fewer only if fewer were analyzed).
- "priority" is one of "must_read", "highly_recommended", "interesting".
- Use only paper ids that appear in the analyzed papers.
- "top_paper_ids" lists the most important papers first.
{json_only}"#,
        report_date = report_date,
        stats = stats,
        clusters = clusters,
        papers = papers,
        json_only = JSON_ONLY
    )
}
