use crate::anomaly::AnomalyResult;
use crate::knowledge::KnowledgeEntry;
use crate::narrative::RuleContext;
use crate::trend::TrendResult;
use oxpulse_common::types::format_labels;

pub const SYSTEM_PROMPT: &str = "You are a senior site reliability engineer. You analyse a single \
firing alert together with statistical signals and answer with one JSON object only.";

/// Builds the user prompt for one alert.
pub fn build_narrative_prompt(
    ctx: &RuleContext,
    anomaly: &AnomalyResult,
    trend: &TrendResult,
    knowledge: &[&KnowledgeEntry],
) -> String {
    let labels = if ctx.labels.is_empty() {
        "none".to_string()
    } else {
        format_labels(&ctx.labels)
    };
    let predictions = trend
        .predictions
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(", ");
    let knowledge_text = if knowledge.is_empty() {
        "(no matching entries)".to_string()
    } else {
        knowledge
            .iter()
            .map(|k| format!("- {}: {}", k.title, k.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    NARRATIVE_PROMPT
        .replace("{{RULE_NAME}}", &ctx.rule_name)
        .replace("{{SEVERITY}}", ctx.severity.as_str())
        .replace("{{TARGET}}", &format!("{} {}", ctx.target_type, ctx.target_id))
        .replace("{{METRIC}}", &ctx.metric_name)
        .replace(
            "{{CONDITION}}",
            &format!("{:.2} {} {:.2}", ctx.value, ctx.operator.symbol(), ctx.threshold),
        )
        .replace("{{LABELS}}", &labels)
        .replace(
            "{{ANOMALY}}",
            &format!(
                "z-score {:.2}, score {:.2} against threshold {:.1}, deviation {}, mean {:.2}, \
                 stddev {:.2}, {} samples, confidence {:.2}",
                anomaly.z_score,
                anomaly.anomaly_score,
                anomaly.threshold,
                anomaly.deviation_level.as_str(),
                anomaly.mean,
                anomaly.stddev,
                anomaly.sample_count,
                anomaly.confidence,
            ),
        )
        .replace(
            "{{TREND}}",
            &format!(
                "{} (slope {:.3}/step), risk {}, seasonal {}, next values [{}], accuracy {:.2}",
                trend.direction.as_str(),
                trend.slope,
                trend.risk_level.as_str(),
                if trend.seasonal { "yes" } else { "no" },
                predictions,
                trend.accuracy,
            ),
        )
        .replace("{{KNOWLEDGE}}", &knowledge_text)
}

const NARRATIVE_PROMPT: &str = r#"An alert is firing.

Rule: {{RULE_NAME}} (severity {{SEVERITY}})
Target: {{TARGET}}
Metric: {{METRIC}}
Condition: {{CONDITION}}
Labels: {{LABELS}}

Anomaly signal: {{ANOMALY}}
Trend signal: {{TREND}}

Relevant runbook notes:
{{KNOWLEDGE}}

Answer with a single JSON object and nothing else:
{
  "narrative": "two or three sentences describing what is happening",
  "root_cause": "most likely root cause",
  "recommendations": ["ranked action 1", "ranked action 2"],
  "severity_assessment": "low|medium|high|critical",
  "confidence": 0.0
}
"#;
