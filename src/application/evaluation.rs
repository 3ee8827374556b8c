//! Candidate evaluation
//!
//! Builds the market briefing for one symbol, queries the decision oracle,
//! and decodes its completion. Parsing is deliberately tolerant of prose
//! and code fences around the JSON object, but the decode itself is strict
//! and any failure degrades to the do-nothing verdict rather than an error.

use tracing::warn;

use crate::gex::GexAnalysis;
use crate::ports::oracle::{DecisionOraclePort, OptionsDecision, OracleDecision};
use crate::ports::sentiment::{SentimentPort, SentimentSnapshot};
use crate::ports::technicals::{TechnicalSnapshot, TechnicalsPort};
use crate::squeeze::SqueezeUpdate;

pub const EQUITY_SYSTEM_PROMPT: &str = "You are the decision engine of a cautious US equity \
trading bot. You receive a technical and sentiment briefing for one symbol. Respond with a \
single JSON object and nothing else: {\"action\": \"buy\" | \"sell\" | \"hold\", \
\"confidence\": <number 0.0-1.0>, \"reasoning\": \"<one sentence>\"}. Recommend buy or sell \
only on strong evidence; when in doubt, hold.";

pub const OPTIONS_SYSTEM_PROMPT: &str = "You are the decision engine of a zero-DTE options \
trading bot. You receive a dealer gamma exposure briefing for one underlying. Respond with a \
single JSON object and nothing else: {\"action\": \"call\" | \"put\" | \"skip\", \
\"confidence\": <number 0.0-1.0>, \"reasoning\": \"<one sentence>\"}. Same-day options decay \
fast: recommend a direction only when dealer positioning clearly favors it; otherwise skip.";

/// Everything gathered about one candidate before the gates run.
#[derive(Debug, Clone)]
pub struct CandidateEvaluation {
    pub symbol: String,
    pub technicals: Option<TechnicalSnapshot>,
    pub sentiment: SentimentSnapshot,
    pub decision: OracleDecision,
}

/// Cut the outermost `{...}` span from a completion, tolerating prose and
/// code fences around it.
fn json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Strict decode of an equity verdict with the safe-default fallback.
pub fn parse_decision(raw: &str) -> OracleDecision {
    let Some(span) = json_span(raw) else {
        warn!(raw = %raw.chars().take(120).collect::<String>(), "no JSON in oracle reply, holding");
        return OracleDecision::hold();
    };
    match serde_json::from_str::<OracleDecision>(span) {
        Ok(mut decision) => {
            decision.confidence = decision.confidence.clamp(0.0, 1.0);
            decision
        }
        Err(e) => {
            warn!(error = %e, "oracle reply failed strict decode, holding");
            OracleDecision::hold()
        }
    }
}

/// Strict decode of a zero-DTE verdict with the safe-default fallback.
pub fn parse_options_decision(raw: &str) -> OptionsDecision {
    let Some(span) = json_span(raw) else {
        warn!(raw = %raw.chars().take(120).collect::<String>(), "no JSON in oracle reply, skipping");
        return OptionsDecision::skip();
    };
    match serde_json::from_str::<OptionsDecision>(span) {
        Ok(mut decision) => {
            decision.confidence = decision.confidence.clamp(0.0, 1.0);
            decision
        }
        Err(e) => {
            warn!(error = %e, "oracle reply failed strict decode, skipping");
            OptionsDecision::skip()
        }
    }
}

fn format_dollars(value: f64) -> String {
    let abs = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };
    if abs >= 1e9 {
        format!("{sign}${:.2}B", abs / 1e9)
    } else if abs >= 1e6 {
        format!("{sign}${:.1}M", abs / 1e6)
    } else {
        format!("{sign}${abs:.0}")
    }
}

/// The equity briefing handed to the oracle as the user message.
pub fn build_equity_prompt(
    symbol: &str,
    technicals: Option<&TechnicalSnapshot>,
    sentiment: &SentimentSnapshot,
) -> String {
    let mut out = format!("Symbol: {symbol}\n");

    match technicals {
        Some(t) => {
            out.push_str(&format!("Price: ${:.2}\n", t.price));
            match t.rsi_14 {
                Some(rsi) => out.push_str(&format!("RSI(14): {rsi:.1}\n")),
                None => out.push_str("RSI(14): n/a\n"),
            }
            match (t.sma_50, t.sma_200) {
                (Some(s50), Some(s200)) => {
                    out.push_str(&format!("SMA50: ${s50:.2}  SMA200: ${s200:.2}\n"));
                }
                (Some(s50), None) => out.push_str(&format!("SMA50: ${s50:.2}  SMA200: n/a\n")),
                _ => out.push_str("SMA50: n/a  SMA200: n/a\n"),
            }
            if let Some(macd) = t.macd {
                out.push_str(&format!(
                    "MACD: {:.3} signal {:.3} histogram {:.3}\n",
                    macd.macd, macd.signal, macd.histogram
                ));
            }
            out.push_str(&format!("Trend: {}\n", t.trend));
        }
        None => out.push_str("Technicals: unavailable\n"),
    }

    out.push_str(&format!(
        "News sentiment: {} (score {:+.2} over {} headlines)\n",
        sentiment.label(),
        sentiment.score,
        sentiment.headline_count
    ));
    for headline in &sentiment.sample_headlines {
        out.push_str(&format!("- {headline}\n"));
    }

    out.push_str("Respond with the JSON object only.");
    out
}

/// The gamma briefing for the zero-DTE variant.
pub fn build_options_prompt(analysis: &GexAnalysis, squeeze: Option<&SqueezeUpdate>) -> String {
    let mut out = format!(
        "Underlying: {}\nSpot: ${:.2}\nDealer regime: {} (confidence {:.2})\nNet GEX: {}\n",
        analysis.ticker,
        analysis.spot,
        analysis.regime.label,
        analysis.regime.confidence,
        format_dollars(analysis.total_net_gex),
    );

    match (analysis.gamma_flip, analysis.flip_distance_pct()) {
        (Some(flip), Some(dist)) => {
            out.push_str(&format!("Gamma flip: ${flip:.2} ({dist:+.2}% from spot)\n"));
        }
        _ => out.push_str("Gamma flip: none in range\n"),
    }

    if let Some(wall) = analysis.walls.calls.first() {
        out.push_str(&format!(
            "Call wall: ${:.2} ({}){}\n",
            wall.strike,
            format_dollars(wall.dollar_gex),
            if wall.stacked { ", stacked" } else { "" }
        ));
    }
    if let Some(wall) = analysis.walls.puts.first() {
        out.push_str(&format!(
            "Put wall: ${:.2} ({}){}\n",
            wall.strike,
            format_dollars(wall.dollar_gex),
            if wall.stacked { ", stacked" } else { "" }
        ));
    }

    if let Some(update) = squeeze {
        out.push_str(&format!(
            "Squeeze: {} (score {:.0}/100)\n",
            update.state, update.breakdown.total
        ));
    }

    out.push_str("Respond with the JSON object only.");
    out
}

/// Gather technicals and sentiment concurrently, then ask the oracle.
///
/// Upstream failures never abort the candidate: missing technicals are
/// flagged in the briefing, missing sentiment reads as no coverage, and
/// an unreachable oracle yields the hold verdict.
pub async fn evaluate_equity_candidate(
    technicals: &dyn TechnicalsPort,
    sentiment: &dyn SentimentPort,
    oracle: &dyn DecisionOraclePort,
    symbol: &str,
) -> CandidateEvaluation {
    let (tech, sent) = tokio::join!(technicals.snapshot(symbol), sentiment.snapshot(symbol));

    let tech = match tech {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(symbol, error = %e, "technicals unavailable");
            None
        }
    };
    let sent = match sent {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(symbol, error = %e, "sentiment unavailable");
            SentimentSnapshot::empty(symbol)
        }
    };

    let briefing = build_equity_prompt(symbol, tech.as_ref(), &sent);
    let decision = match oracle.complete(EQUITY_SYSTEM_PROMPT, &briefing).await {
        Ok(raw) => parse_decision(&raw),
        Err(e) => {
            warn!(symbol, error = %e, "oracle unavailable, holding");
            OracleDecision::hold()
        }
    };

    CandidateEvaluation {
        symbol: symbol.to_string(),
        technicals: tech,
        sentiment: sent,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{neutral_technicals, MockOracle, MockSentiment, MockTechnicals};
    use crate::ports::oracle::{OptionsAction, OracleAction};

    #[test]
    fn parses_a_clean_json_object() {
        let decision =
            parse_decision(r#"{"action": "buy", "confidence": 0.82, "reasoning": "uptrend"}"#);
        assert_eq!(decision.action, OracleAction::Buy);
        assert_eq!(decision.confidence, 0.82);
        assert_eq!(decision.reasoning, "uptrend");
    }

    #[test]
    fn parses_json_wrapped_in_prose_and_fences() {
        let raw = "Sure, here is my verdict:\n```json\n{\"action\": \"sell\", \"confidence\": 0.7}\n```\nGood luck!";
        let decision = parse_decision(raw);
        assert_eq!(decision.action, OracleAction::Sell);
        assert_eq!(decision.confidence, 0.7);
        assert!(decision.reasoning.is_empty());
    }

    #[test]
    fn garbage_degrades_to_hold_with_zero_confidence() {
        for raw in ["no json here", "{broken", "{\"action\": \"yolo\", \"confidence\": 1}"] {
            let decision = parse_decision(raw);
            assert_eq!(decision.action, OracleAction::Hold);
            assert_eq!(decision.confidence, 0.0);
        }
    }

    #[test]
    fn confidence_is_clamped_into_unit_range() {
        let decision = parse_decision(r#"{"action": "buy", "confidence": 7.5}"#);
        assert_eq!(decision.confidence, 1.0);
        let decision = parse_decision(r#"{"action": "buy", "confidence": -0.4}"#);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn skip_is_an_alias_for_hold() {
        let decision = parse_decision(r#"{"action": "skip", "confidence": 0.9}"#);
        assert_eq!(decision.action, OracleAction::Hold);
    }

    #[test]
    fn options_parse_accepts_call_put_skip() {
        let decision = parse_options_decision(r#"{"action": "put", "confidence": 0.85}"#);
        assert_eq!(decision.action, OptionsAction::Put);
        let decision = parse_options_decision("nothing useful");
        assert_eq!(decision.action, OptionsAction::Skip);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn equity_prompt_carries_the_briefing() {
        let tech = neutral_technicals("AAPL", 210.0);
        let mut sentiment = SentimentSnapshot::empty("AAPL");
        sentiment.headline_count = 4;
        sentiment.score = 0.5;
        sentiment.sample_headlines = vec!["Apple beats estimates".to_string()];

        let prompt = build_equity_prompt("AAPL", Some(&tech), &sentiment);
        assert!(prompt.contains("Symbol: AAPL"));
        assert!(prompt.contains("Price: $210.00"));
        assert!(prompt.contains("bullish"));
        assert!(prompt.contains("- Apple beats estimates"));
        assert!(prompt.ends_with("Respond with the JSON object only."));
    }

    #[test]
    fn equity_prompt_marks_missing_technicals() {
        let prompt = build_equity_prompt("XYZ", None, &SentimentSnapshot::empty("XYZ"));
        assert!(prompt.contains("Technicals: unavailable"));
        assert!(prompt.contains("no coverage"));
    }

    #[tokio::test]
    async fn system_prompt_and_briefing_reach_the_oracle() {
        use crate::ports::oracle::MockDecisionOraclePort;

        let technicals = MockTechnicals::new().with_snapshot(neutral_technicals("NVDA", 130.0));
        let sentiment = MockSentiment::new();
        let mut oracle = MockDecisionOraclePort::new();
        oracle
            .expect_complete()
            .withf(|system, user| {
                system == EQUITY_SYSTEM_PROMPT && user.contains("Symbol: NVDA")
            })
            .returning(|_, _| Ok(r#"{"action": "hold", "confidence": 0.4}"#.to_string()));

        let eval = evaluate_equity_candidate(&technicals, &sentiment, &oracle, "NVDA").await;
        assert_eq!(eval.decision.action, OracleAction::Hold);
        assert_eq!(eval.decision.confidence, 0.4);
    }

    #[tokio::test]
    async fn oracle_failure_degrades_to_hold() {
        let technicals = MockTechnicals::new().with_snapshot(neutral_technicals("MSFT", 420.0));
        let sentiment = MockSentiment::new();
        let oracle = MockOracle::new().with_error("rate limited");

        let eval =
            evaluate_equity_candidate(&technicals, &sentiment, &oracle, "MSFT").await;
        assert_eq!(eval.decision.action, OracleAction::Hold);
        assert_eq!(eval.decision.confidence, 0.0);
        assert!(eval.technicals.is_some());
    }

    #[tokio::test]
    async fn evaluation_survives_missing_technicals() {
        let technicals = MockTechnicals::new();
        let sentiment = MockSentiment::new();
        let oracle = MockOracle::new()
            .with_response(r#"{"action": "buy", "confidence": 0.9, "reasoning": "test"}"#);

        let eval = evaluate_equity_candidate(&technicals, &sentiment, &oracle, "NEWCO").await;
        assert!(eval.technicals.is_none());
        assert_eq!(eval.decision.action, OracleAction::Buy);

        let prompts = oracle.prompts();
        assert!(prompts[0].1.contains("Technicals: unavailable"));
    }
}
