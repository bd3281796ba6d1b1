//! Intent Classifier
//!
//! Produces a `RoutingDecision` for every query. Two independent questions:
//! - Grounded vs conversational: does the answer depend on facts that must
//!   come from a curated source (regulations, government schemes, market data,
//!   document templates)?
//! - Actionable: does the user ask for a mutation (budget, goal, debt,
//!   payment, investment projection) with at least one usable argument?
//!
//! Pure and deterministic: keyword tables only, no I/O.

use crate::language::LanguageDetector;
use crate::models::{ActionType, RoutingDecision};

/// Terms whose answers must be grounded
const GROUNDED_KEYWORDS: &[&str] = &[
    // Regulators and rules
    "rbi", "sebi", "irdai", "pfrda", "gst", "income tax", "tax slab", "section 80c",
    "80c", "80d", "tds", "itr", "kyc", "repo rate", "regulation", "circular",
    // Government schemes
    "mudra", "pm kisan", "pm-kisan", "ppf", "nps", "sukanya", "ssy", "atal pension",
    "jan dhan", "pmjdy", "ayushman", "pmay", "stand-up india", "kisan credit card",
    "senior citizen savings", "scss", "government scheme", "scheme",
    // Market data
    "nifty", "sensex", "share price", "stock price", "nav", "gold price", "fd rate",
    "interest rate", "inflation rate", "exchange rate",
    // Document templates
    "template", "format for", "application letter", "sample letter", "form 16",
    // Regional terms
    "योजना", "मुद्रा", "ब्याज दर", "सरकारी", "आयकर",
    "প্রকল্প", "திட்டம்", "పథకం", "ಯೋಜನೆ", "പദ്ധതി", "યોજના", "ਯੋਜਨਾ",
];

/// Short conversational turns. These always win over grounded keywords.
const CONVERSATIONAL_PATTERNS: &[&str] = &[
    "hi", "hello", "hey", "namaste", "good morning", "good afternoon", "good evening",
    "thanks", "thank you", "thx", "bye", "how are you", "who are you",
    "what do you think", "your opinion", "do you think", "should i",
    "नमस्ते", "धन्यवाद", "शुक्रिया",
];

/// Upper bound (in words) for a turn to count as conversational
const CONVERSATIONAL_MAX_WORDS: usize = 8;

/// Words that make a query carry an extractable temporal argument
const TEMPORAL_WORDS: &[&str] = &[
    "today", "tomorrow", "tonight", "next week", "next month", "next year",
    "every month", "every week", "monthly", "weekly", "yearly", "annually", "daily",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december",
    "lakh", "lakhs", "crore", "thousand", "hundred",
];

/// What may precede a verb for it to read as a request. Anything else (a
/// subject, an auxiliary, a question word) makes it a statement or question.
const IMPERATIVE_LEADS: &[&str] = &[
    "please", "pls", "kindly", "just", "now", "ok", "okay",
    "can you", "could you", "would you", "will you",
    "can you please", "could you please", "would you please",
    "help me", "help me to", "please help me",
    "i want to", "i want you to", "i'd like to", "i would like to",
    "i need to", "i need you to", "let's", "lets", "remind me to",
];

/// Words that start a new clause inside a sentence
const CLAUSE_CONNECTORS: &[&str] = &["and", "then", "also", "&"];

/// An imperative verb followed (later in the text) by one of the objects
struct ActionPattern {
    action: ActionType,
    verbs: &'static [&'static str],
    objects: &'static [&'static str],
}

/// Checked in order; first match names the action hint.
const ACTION_PATTERNS: &[ActionPattern] = &[
    ActionPattern {
        action: ActionType::SchedulePayment,
        verbs: &["schedule", "remind", "remind me", "set up", "automate", "pay", "auto-pay"],
        objects: &[
            "payment", "rent", "bill", "emi", "sip", "subscription", "premium",
            "installment", "instalment", "fees", "fee",
        ],
    },
    ActionPattern {
        action: ActionType::UpsertBudget,
        verbs: &["set", "create", "make", "update", "change", "increase", "reduce", "cap", "limit"],
        objects: &["budget", "spending limit", "spend limit"],
    },
    ActionPattern {
        action: ActionType::CreateGoal,
        verbs: &["save", "start saving", "create", "set", "add", "plan"],
        objects: &["goal", "target", "fund", "for a", "for my", "for the"],
    },
    ActionPattern {
        action: ActionType::AddDebt,
        verbs: &["track", "add", "log", "record", "note"],
        objects: &["loan", "debt", "borrowed", "credit card", "emi", "mortgage"],
    },
    ActionPattern {
        action: ActionType::AnalyzeInvestment,
        verbs: &["calculate", "analyze", "analyse", "project", "estimate", "compare", "how much will"],
        objects: &["sip", "investment", "returns", "mutual fund", "fd", "ppf", "lumpsum", "lump sum", "corpus"],
    },
];

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a user query
    pub fn classify(text: &str) -> RoutingDecision {
        let lowered = text.to_lowercase();
        let language = LanguageDetector::detect(text);

        let conversational = is_conversational(&lowered);
        let grounded_hit = GROUNDED_KEYWORDS
            .iter()
            .find(|kw| find_phrase(&lowered, kw).is_some());

        let use_grounded_retrieval = grounded_hit.is_some() && !conversational;

        let action_hint = if has_argument(&lowered) {
            ACTION_PATTERNS
                .iter()
                .find(|p| matches_pattern(&lowered, p))
                .map(|p| p.action)
        } else {
            None
        };

        let mut reason = Vec::with_capacity(3);
        match (grounded_hit, conversational) {
            (Some(kw), true) => reason.push(format!("conversational turn overrides keyword '{}'", kw)),
            (Some(kw), false) => reason.push(format!("grounded keyword '{}'", kw)),
            (None, _) => reason.push("no grounded keyword".to_string()),
        }
        reason.push(format!("language {}", language.code()));
        if let Some(action) = action_hint {
            reason.push(format!("actionable {}", action));
        }

        RoutingDecision {
            use_grounded_retrieval,
            language,
            is_actionable: action_hint.is_some(),
            action_hint,
            reason: reason.join("; "),
        }
    }
}

fn is_conversational(lowered: &str) -> bool {
    lowered.split_whitespace().count() <= CONVERSATIONAL_MAX_WORDS
        && CONVERSATIONAL_PATTERNS
            .iter()
            .any(|p| find_phrase(lowered, p).is_some())
}

/// Digits in any script count, so "₹१५०००" is an argument
fn has_argument(lowered: &str) -> bool {
    lowered.chars().any(char::is_numeric)
        || TEMPORAL_WORDS.iter().any(|w| find_phrase(lowered, w).is_some())
}

fn matches_pattern(lowered: &str, pattern: &ActionPattern) -> bool {
    let first_verb = pattern
        .verbs
        .iter()
        .filter_map(|v| phrase_positions(lowered, v).find(|&idx| is_imperative_position(lowered, idx)))
        .min();

    let last_object = pattern
        .objects
        .iter()
        .filter_map(|o| phrase_positions(lowered, o).last())
        .max();

    matches!((first_verb, last_object), (Some(v), Some(o)) if o > v)
}

/// True when the words between the start of the clause and `idx` are empty
/// or one of `IMPERATIVE_LEADS`
fn is_imperative_position(lowered: &str, idx: usize) -> bool {
    let before = &lowered[..idx];
    let clause_start = before
        .char_indices()
        .rev()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | ',' | ';' | ':' | '\n' | '\u{0964}'))
        .map_or(0, |(i, c)| i + c.len_utf8());

    let words: Vec<&str> = before[clause_start..].split_whitespace().collect();
    let lead = match words.iter().rposition(|w| CLAUSE_CONNECTORS.contains(w)) {
        Some(pos) => &words[pos + 1..],
        None => &words[..],
    };

    lead.is_empty() || IMPERATIVE_LEADS.contains(&lead.join(" ").as_str())
}

fn find_phrase(text: &str, phrase: &str) -> Option<usize> {
    phrase_positions(text, phrase).next()
}

/// Byte offsets of whole-word occurrences. Non-ASCII phrases match as plain
/// substrings since Indic combining marks make word boundaries unreliable.
fn phrase_positions<'a>(text: &'a str, phrase: &'a str) -> impl Iterator<Item = usize> + 'a {
    let ascii = phrase.is_ascii();
    text.match_indices(phrase).filter_map(move |(idx, _)| {
        if !ascii {
            return Some(idx);
        }
        let before_ok = text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[idx + phrase.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        (before_ok && after_ok).then_some(idx)
    })
}
