//! Tool-call interpreter
//!
//! Parses a model response for an action envelope and decodes it into a
//! strictly typed `ActionParameters`. The envelope is a JSON object, either
//! inside a ```json fenced block or inline in the text:
//!
//! ```text
//! {"action": "schedule_payment", "arguments": {"name": "Rent", "amount": 15000, ...}}
//! ```
//!
//! Validation happens here, once. A malformed envelope is rejected with the
//! offending field; nothing is defaulted except fields the schema declares
//! optional.

use crate::error::AssistantError;
use crate::models::{
    ActionParameters, ActionType, BudgetPeriod, InvestmentKind, PaymentFrequency,
    ProposedAction, RoutingDecision,
};
use crate::Result;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use std::ops::Range;
use std::str::FromStr;
use tracing::debug;

/// Argument schema per action, as described to the model
const ACTION_SCHEMAS: &[(ActionType, &str)] = &[
    (
        ActionType::UpsertBudget,
        "category (string), limit (number > 0), period (\"weekly\" | \"monthly\")",
    ),
    (
        ActionType::CreateGoal,
        "name (string), target_amount (number > 0), deadline (YYYY-MM-DD, not in the past)",
    ),
    (
        ActionType::AddDebt,
        "name (string), principal (number > 0), rate (annual %, 0-100), start_date (YYYY-MM-DD), \
         emi (number > 0, optional), tenure_months (integer > 0, optional)",
    ),
    (
        ActionType::SchedulePayment,
        "name (string), amount (number > 0), frequency (\"once\" | \"weekly\" | \"monthly\" | \"quarterly\" | \"yearly\"), \
         next_due (YYYY-MM-DD, not in the past), auto_track (boolean, optional)",
    ),
    (
        ActionType::AnalyzeInvestment,
        "kind (\"sip\" | \"lumpsum\"), amount (number > 0), annual_rate (expected annual return %, 0-100), years (integer > 0)",
    ),
];

const MAX_YEARS: u32 = 100;
const MAX_RATE_PCT: f64 = 100.0;

pub struct ToolCallInterpreter;

impl ToolCallInterpreter {
    /// Interpret a response for an action proposal. Only actionable decisions
    /// are considered; anything else returns `Ok(None)`.
    pub fn interpret(response: &str, decision: &RoutingDecision) -> Result<Option<ProposedAction>> {
        Self::interpret_at(response, decision, Utc::now().date_naive())
    }

    /// Same as `interpret`, validating dates against `today`
    pub fn interpret_at(
        response: &str,
        decision: &RoutingDecision,
        today: NaiveDate,
    ) -> Result<Option<ProposedAction>> {
        if !decision.is_actionable {
            return Ok(None);
        }

        let Some((envelope, _)) = extract_envelope(response) else {
            debug!("Actionable query but no action envelope in response");
            return Ok(None);
        };

        let parameters = decode_envelope(&envelope, today)?;

        if decision.action_hint != Some(parameters.action_type()) {
            debug!(
                hint = ?decision.action_hint,
                proposed = %parameters.action_type(),
                "Model proposed a different action than the classifier hint"
            );
        }

        Ok(Some(ProposedAction::new(parameters)))
    }

    /// Response text with the action envelope removed
    pub fn strip_envelope(response: &str) -> String {
        match extract_envelope(response) {
            Some((_, range)) => {
                let mut text = String::with_capacity(response.len());
                text.push_str(&response[..range.start]);
                text.push_str(&response[range.end..]);
                text.trim().to_string()
            }
            None => response.trim().to_string(),
        }
    }

    /// Prompt for the tool-call path
    pub fn tool_prompt(query: &str, hint: Option<ActionType>, today: NaiveDate) -> String {
        let actions: Vec<String> = ACTION_SCHEMAS
            .iter()
            .map(|(action, schema)| format!("- {}: {}", action, schema))
            .collect();

        let hint_line = hint
            .map(|h| format!("The request most likely maps to `{}`.\n", h))
            .unwrap_or_default();

        format!(
            r#"Today is {today}.

The user wants you to perform an action. Reply with one short confirmation sentence
followed by exactly ONE JSON block in this format:

```json
{{"action": "<action name>", "arguments": {{ ... }}}}
```

Available actions and their arguments:
{actions}

{hint_line}Resolve relative dates ("1st of every month", "next Friday") to concrete YYYY-MM-DD dates.
Amounts are plain numbers in rupees.

User request: {query}"#,
            today = today,
            actions = actions.join("\n"),
            hint_line = hint_line,
            query = query,
        )
    }
}

/// Find the action envelope: a fenced block first, then the widest `{ ... }`
/// span. Returns the parsed object and the byte range to strip.
fn extract_envelope(text: &str) -> Option<(Value, Range<usize>)> {
    // 1) ```json ... ``` (or a bare ``` fence)
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_ticks = fence_start + 3;
        let body_start = text[after_ticks..]
            .find('\n')
            .map(|i| after_ticks + i + 1)
            .unwrap_or(after_ticks);
        let Some(rel_end) = text[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + rel_end;
        let fence_end = body_end + 3;

        if let Some(value) = parse_envelope(&text[body_start..body_end]) {
            return Some((value, fence_start..fence_end));
        }
        search_from = fence_end;
    }

    // 2) Fallback: the largest { ... } block in the text
    let brace_start = text.find('{')?;
    let brace_end = text.rfind('}')?;
    if brace_end <= brace_start {
        return None;
    }
    parse_envelope(&text[brace_start..=brace_end]).map(|v| (v, brace_start..brace_end + 1))
}

fn parse_envelope(candidate: &str) -> Option<Value> {
    let parsed: Value = serde_json::from_str(candidate.trim()).ok()?;
    (parsed.is_object() && parsed.get("action").is_some()).then_some(parsed)
}

fn decode_envelope(envelope: &Value, today: NaiveDate) -> Result<ActionParameters> {
    let name = envelope
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| AssistantError::validation("action", "must be a string"))?;

    let action_type = ActionType::from_str(name.trim())
        .map_err(|e| AssistantError::validation("action", e))?;

    let arguments = envelope
        .get("arguments")
        .and_then(Value::as_object)
        .ok_or_else(|| AssistantError::validation("arguments", "must be an object"))?;

    let args = Args(arguments);

    let parameters = match action_type {
        ActionType::UpsertBudget => ActionParameters::UpsertBudget {
            category: args.string("category")?,
            limit: args.amount("limit")?,
            period: args.choice::<BudgetPeriod>("period")?,
        },
        ActionType::CreateGoal => ActionParameters::CreateGoal {
            name: args.string("name")?,
            target_amount: args.amount("target_amount")?,
            deadline: args.upcoming_date("deadline", today)?,
        },
        ActionType::AddDebt => ActionParameters::AddDebt {
            name: args.string("name")?,
            principal: args.amount("principal")?,
            rate: args.rate("rate")?,
            emi: args.optional_amount("emi")?,
            // Past start dates are expected: debts are usually logged late
            start_date: args.date("start_date")?,
            tenure_months: args.optional_count("tenure_months")?,
        },
        ActionType::SchedulePayment => ActionParameters::SchedulePayment {
            name: args.string("name")?,
            amount: args.amount("amount")?,
            frequency: args.choice::<PaymentFrequency>("frequency")?,
            next_due: args.upcoming_date("next_due", today)?,
            auto_track: args.optional_bool("auto_track")?.unwrap_or(false),
        },
        ActionType::AnalyzeInvestment => {
            let years = args.count("years")?;
            if years > MAX_YEARS {
                return Err(AssistantError::validation(
                    "years",
                    format!("must be at most {}", MAX_YEARS),
                ));
            }
            let annual_rate = args.rate("annual_rate")?;
            if annual_rate == 0.0 {
                return Err(AssistantError::validation("annual_rate", "must be positive"));
            }
            ActionParameters::AnalyzeInvestment {
                kind: args.choice::<InvestmentKind>("kind")?,
                amount: args.amount("amount")?,
                annual_rate,
                years,
            }
        }
    };

    Ok(parameters)
}

/// Typed accessors over the raw argument map
struct Args<'a>(&'a Map<String, Value>);

impl<'a> Args<'a> {
    fn required(&self, field: &str) -> Result<&'a Value> {
        match self.0.get(field) {
            None | Some(Value::Null) => Err(AssistantError::validation(field, "is required")),
            Some(v) => Ok(v),
        }
    }

    fn optional(&self, field: &str) -> Option<&'a Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    fn string(&self, field: &str) -> Result<String> {
        let value = self
            .required(field)?
            .as_str()
            .ok_or_else(|| AssistantError::validation(field, "must be a string"))?
            .trim();
        if value.is_empty() {
            return Err(AssistantError::validation(field, "must not be empty"));
        }
        Ok(value.to_string())
    }

    fn number(&self, field: &str, value: &Value) -> Result<f64> {
        let n = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_amount_text(s),
            _ => None,
        }
        .ok_or_else(|| AssistantError::validation(field, "must be a number"))?;

        if !n.is_finite() {
            return Err(AssistantError::validation(field, "must be a finite number"));
        }
        Ok(n)
    }

    fn amount(&self, field: &str) -> Result<f64> {
        let n = self.number(field, self.required(field)?)?;
        if n <= 0.0 {
            return Err(AssistantError::validation(field, "must be a positive amount"));
        }
        Ok(n)
    }

    fn optional_amount(&self, field: &str) -> Result<Option<f64>> {
        match self.optional(field) {
            None => Ok(None),
            Some(_) => self.amount(field).map(Some),
        }
    }

    fn rate(&self, field: &str) -> Result<f64> {
        let n = self.number(field, self.required(field)?)?;
        if !(0.0..=MAX_RATE_PCT).contains(&n) {
            return Err(AssistantError::validation(
                field,
                format!("must be a percentage between 0 and {}", MAX_RATE_PCT),
            ));
        }
        Ok(n)
    }

    fn count(&self, field: &str) -> Result<u32> {
        let n = self.number(field, self.required(field)?)?;
        if n < 1.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
            return Err(AssistantError::validation(field, "must be a positive whole number"));
        }
        Ok(n as u32)
    }

    fn optional_count(&self, field: &str) -> Result<Option<u32>> {
        match self.optional(field) {
            None => Ok(None),
            Some(_) => self.count(field).map(Some),
        }
    }

    fn optional_bool(&self, field: &str) -> Result<Option<bool>> {
        match self.optional(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(AssistantError::validation(field, "must be true or false")),
        }
    }

    fn choice<T>(&self, field: &str) -> Result<T>
    where
        T: FromStr<Err = String>,
    {
        let raw = self
            .required(field)?
            .as_str()
            .ok_or_else(|| AssistantError::validation(field, "must be a string"))?;
        raw.parse::<T>()
            .map_err(|e| AssistantError::validation(field, e))
    }

    fn date(&self, field: &str) -> Result<NaiveDate> {
        let raw = self
            .required(field)?
            .as_str()
            .ok_or_else(|| AssistantError::validation(field, "must be a date string"))?;
        parse_date(raw).ok_or_else(|| {
            AssistantError::validation(field, format!("'{}' is not a valid date (YYYY-MM-DD)", raw))
        })
    }

    fn upcoming_date(&self, field: &str, today: NaiveDate) -> Result<NaiveDate> {
        let date = self.date(field)?;
        if date < today {
            return Err(AssistantError::validation(
                field,
                format!("{} is in the past", date),
            ));
        }
        Ok(date)
    }
}

/// "₹15,000", "Rs. 2500", "15000.50" → number
fn parse_amount_text(raw: &str) -> Option<f64> {
    let lowered = raw.trim().to_lowercase();
    let stripped = lowered
        .trim_start_matches('₹')
        .trim_start_matches("inr")
        .trim_start_matches("rs.")
        .trim_start_matches("rs")
        .trim();
    let cleaned: String = stripped.chars().filter(|c| *c != ',' && *c != ' ').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}
