//! Prompt composition and structured-output parsing for the state machine.
//!
//! The model communicates hypotheses and verdicts through line-oriented
//! markers (`HYPOTHESIS:`, `VERDICT:`, `SUB:`). Malformed lines are contract
//! violations: logged and skipped, never fatal.

use sleuth_core::investigation::EvidenceStrength;
use sleuth_core::tool::ToolSpec;

use crate::hypothesis::{HypothesisCategory, HypothesisNode};

pub const HYPOTHESIS_MARKER: &str = "HYPOTHESIS:";
pub const VERDICT_MARKER: &str = "VERDICT:";
pub const SUB_MARKER: &str = "SUB:";

/// System prompt: role, tools, and the ambient context blocks.
pub fn compose_system_prompt(
    tools: &[ToolSpec],
    infra_summary: Option<&str>,
    knowledge_summary: &str,
    service_summaries: &[String],
) -> String {
    let mut out = String::from(
        "You are an incident investigation agent. Work hypothesis-first: \
         gather evidence with the available tools, weigh it, and identify \
         the root cause. Never guess when evidence is insufficient; say what \
         remains unknown.\n\n",
    );

    if !tools.is_empty() {
        out.push_str("## Available tools\n");
        for tool in tools {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        out.push('\n');
    }
    if let Some(infra) = infra_summary {
        out.push_str("## Infrastructure snapshot\n");
        out.push_str(infra);
        out.push('\n');
    }
    if !knowledge_summary.is_empty() {
        out.push_str("## Organizational knowledge\n");
        out.push_str(knowledge_summary);
        out.push('\n');
    }
    for summary in service_summaries {
        out.push_str("## Service context\n");
        out.push_str(summary);
        out.push('\n');
    }
    out
}

/// User prompt for one iteration: tiered results, hypothesis frontier,
/// memory summary.
pub fn compose_user_prompt(
    tiered_context: &str,
    hypothesis_context: &str,
    memory_summary: &str,
    instruction: &str,
) -> String {
    let mut out = String::new();
    if !tiered_context.is_empty() {
        out.push_str(tiered_context);
        out.push('\n');
    }
    if !hypothesis_context.is_empty() {
        out.push_str(hypothesis_context);
        out.push('\n');
    }
    if !memory_summary.is_empty() {
        out.push_str("## Investigation so far\n");
        out.push_str(memory_summary);
        out.push('\n');
    }
    out.push_str(instruction);
    out
}

pub fn hypothesis_context(frontier: &[&HypothesisNode]) -> String {
    if frontier.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Active hypotheses\n");
    for node in frontier {
        out.push_str(&format!(
            "- [{:?}, priority {}] {} (evidence so far: {:?})\n",
            node.category, node.priority, node.statement, node.evidence_strength
        ));
    }
    out
}

pub const HYPOTHESIZE_INSTRUCTION: &str = "Propose the most plausible causes for this incident. \
     Output one line per hypothesis in exactly this form:\n\
     HYPOTHESIS: <category> | <priority 1-10> | <testable statement>\n\
     Categories: latency, error_rate, memory, cpu, connectivity, deployment, database, scaling, other.";

pub fn evaluate_instruction(statement: &str) -> String {
    format!(
        "Weigh the evidence above against this hypothesis:\n  {statement}\n\
         If you need more data, call tools. Otherwise output exactly one line:\n\
         VERDICT: <strong|weak|none|contradicting> | <reasoning>\n\
         If the verdict is strong but the statement is not yet specific enough \
         to be the root cause, also output refinement lines:\n\
         SUB: <more specific sub-hypothesis>"
    )
}

pub const TRIAGE_INSTRUCTION: &str = "Triage this incident: identify the affected services and the \
     observable symptoms. Use tools to take an initial look at alarms, \
     errors, and recent changes. State symptoms plainly in your reasoning.";

pub const CONCLUDE_INSTRUCTION: &str = "Write the final incident report: the root cause (or explicitly \
     state that evidence was insufficient, with open questions), the \
     supporting evidence chain, impact, and recommended next steps.";

/// A parsed `HYPOTHESIS:` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHypothesis {
    pub category: HypothesisCategory,
    pub priority: u8,
    pub statement: String,
}

/// Parse `HYPOTHESIS: <category> | <priority> | <statement>` lines.
/// Malformed lines are skipped with a warning.
pub fn parse_hypotheses(text: &str) -> Vec<ParsedHypothesis> {
    let mut parsed = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(HYPOTHESIS_MARKER) else {
            continue;
        };
        let fields: Vec<&str> = rest.splitn(3, '|').map(str::trim).collect();
        if fields.len() != 3 || fields[2].is_empty() {
            tracing::warn!(line, "skipping malformed hypothesis line");
            continue;
        }
        let Some(priority) = fields[1].parse::<u8>().ok().filter(|p| (1..=10).contains(p))
        else {
            tracing::warn!(line, "skipping hypothesis with invalid priority");
            continue;
        };
        parsed.push(ParsedHypothesis {
            category: parse_category(fields[0]),
            priority,
            statement: fields[2].to_string(),
        });
    }
    parsed
}

pub fn parse_category(text: &str) -> HypothesisCategory {
    match text.to_lowercase().replace([' ', '-'], "_").as_str() {
        "latency" => HypothesisCategory::Latency,
        "error_rate" | "errors" => HypothesisCategory::ErrorRate,
        "memory" => HypothesisCategory::Memory,
        "cpu" => HypothesisCategory::Cpu,
        "connectivity" | "network" => HypothesisCategory::Connectivity,
        "deployment" | "deploy" => HypothesisCategory::Deployment,
        "database" => HypothesisCategory::Database,
        "scaling" | "capacity" => HypothesisCategory::Scaling,
        _ => HypothesisCategory::Other,
    }
}

/// Parse the first `VERDICT: <strength> | <reasoning>` line.
pub fn parse_verdict(text: &str) -> Option<(EvidenceStrength, String)> {
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(VERDICT_MARKER) else {
            continue;
        };
        let (strength_text, reasoning) = match rest.split_once('|') {
            Some((s, r)) => (s.trim(), r.trim()),
            None => (rest.trim(), ""),
        };
        let strength = match strength_text.to_lowercase().as_str() {
            "strong" => EvidenceStrength::Strong,
            "weak" => EvidenceStrength::Weak,
            "none" => EvidenceStrength::None,
            "contradicting" | "contradicted" => EvidenceStrength::Contradicting,
            other => {
                tracing::warn!(verdict = other, "unrecognized verdict strength");
                return None;
            }
        };
        return Some((strength, reasoning.to_string()));
    }
    None
}

/// Parse `SUB: <statement>` refinement lines.
pub fn parse_sub_hypotheses(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(SUB_MARKER))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wellformed_hypothesis_lines() {
        let text = "Some prose first.\n\
                    HYPOTHESIS: database | 8 | orders-db connection pool exhausted\n\
                    HYPOTHESIS: deployment | 5 | the 14:00 release regressed checkout\n";
        let parsed = parse_hypotheses(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].category, HypothesisCategory::Database);
        assert_eq!(parsed[0].priority, 8);
        assert_eq!(parsed[1].statement, "the 14:00 release regressed checkout");
    }

    #[test]
    fn malformed_hypothesis_lines_are_skipped() {
        let text = "HYPOTHESIS: database | not-a-number | pool exhausted\n\
                    HYPOTHESIS: just words\n\
                    HYPOTHESIS: cpu | 11 | out of range priority\n\
                    HYPOTHESIS: cpu | 7 | host saturated\n";
        let parsed = parse_hypotheses(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].statement, "host saturated");
    }

    #[test]
    fn parses_verdict_with_reasoning() {
        let text = "Looking at the metrics...\nVERDICT: strong | pool at 100% for 20 minutes";
        let (strength, reasoning) = parse_verdict(text).unwrap();
        assert_eq!(strength, EvidenceStrength::Strong);
        assert_eq!(reasoning, "pool at 100% for 20 minutes");

        assert!(parse_verdict("VERDICT: maybe | unsure").is_none());
        assert!(parse_verdict("no verdict at all").is_none());
    }

    #[test]
    fn parses_sub_hypotheses() {
        let text = "VERDICT: strong | db is implicated\nSUB: pool size misconfigured\nSUB: slow query on orders table\n";
        let subs = parse_sub_hypotheses(text);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0], "pool size misconfigured");
    }

    #[test]
    fn category_aliases() {
        assert_eq!(parse_category("error rate"), HypothesisCategory::ErrorRate);
        assert_eq!(parse_category("network"), HypothesisCategory::Connectivity);
        assert_eq!(parse_category("weird"), HypothesisCategory::Other);
    }

    #[test]
    fn prompts_include_all_blocks() {
        let tools = vec![ToolSpec {
            name: "search_logs".into(),
            description: "search log groups".into(),
            parameters_schema: serde_json::json!({}),
        }];
        let system = compose_system_prompt(&tools, Some("2 alarms\n"), "Known issues:\n- x\n", &[]);
        assert!(system.contains("search_logs"));
        assert!(system.contains("2 alarms"));
        assert!(system.contains("Known issues"));

        let user = compose_user_prompt("results", "hypotheses", "memory", "do the thing");
        assert!(user.ends_with("do the thing"));
        assert!(user.contains("results"));
    }
}
