//! Tactical reflex tier: deterministic pattern extraction.
//!
//! A reflex match only fires when every required field for its module can
//! be parsed out of the text. Partial matches fall through to the semantic
//! tier instead of producing half-filled drafts.

use std::sync::LazyLock;

use regex::Regex;

use synapse_common::{CryptoAction, ModuleDraft};

/// "Pizza Hut 12.50 EUR" / "Pizza Hut 12,50 €"
static RE_FINANCE_TRAILING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<merchant>[\p{L}][\p{L}\d&'. -]*?)\s+(?P<amount>\d+(?:[.,]\d{1,2})?)\s*(?P<currency>EUR|USD|GBP|BRL|CHF|eur|usd|gbp|brl|chf|€|\$|£)\s*$",
    )
    .expect("valid finance regex")
});

/// "paid 12.50 EUR at Pizza Hut" / "paguei 9,90 € na Farmácia"
static RE_FINANCE_LEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:paid|spent|paguei|gastei)\s+(?P<amount>\d+(?:[.,]\d{1,2})?)\s*(?P<currency>EUR|USD|GBP|BRL|CHF|€|\$|£)\s+(?:at|in|na|no|em)\s+(?P<merchant>[\p{L}][\p{L}\d&'. -]*)",
    )
    .expect("valid finance regex")
});

/// "bought 0.5 BTC at 61000" / "sell 2 ETH"
static RE_CRYPTO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<action>(?i:buy|bought|sell|sold|comprei|vendi))\s+(?P<amount>\d+(?:[.,]\d+)?)\s*(?P<symbol>[A-Z]{2,6})\b(?:\s*(?:@|at|a)\s*(?P<price>\d+(?:[.,]\d+)?))?",
    )
    .expect("valid crypto regex")
});

static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("valid url regex"));

/// "todo: water the plants" / "remember to call the bank"
static RE_TODO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:todo|task|lembrete)\s*[:\-]\s*(?P<title>.+)$|(?i)^(?:remember to|don't forget to|lembrar de|preciso de)\s+(?P<title2>.+)$",
    )
    .expect("valid todo regex")
});

/// One complete deterministic extraction.
#[derive(Debug, Clone)]
pub struct ReflexMatch {
    pub draft: ModuleDraft,
    pub keywords: Vec<String>,
}

/// Run every reflex rule against the text. Matches come back in precedence
/// order (crypto, finance, links, todo): the first entry is the primary
/// candidate, any second entry is the runner-up.
pub fn extract(text: &str) -> Vec<ReflexMatch> {
    let text = text.trim();
    let mut matches = Vec::new();

    if let Some(m) = match_crypto(text) {
        matches.push(m);
    }
    if let Some(m) = match_finance(text) {
        matches.push(m);
    }
    if let Some(m) = match_link(text) {
        matches.push(m);
    }
    if let Some(m) = match_todo(text) {
        matches.push(m);
    }

    matches
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok().filter(|a| *a > 0.0)
}

fn normalize_currency(raw: &str) -> String {
    match raw {
        "€" => "EUR".to_string(),
        "$" => "USD".to_string(),
        "£" => "GBP".to_string(),
        other => other.to_uppercase(),
    }
}

fn match_finance(text: &str) -> Option<ReflexMatch> {
    let caps = RE_FINANCE_TRAILING
        .captures(text)
        .or_else(|| RE_FINANCE_LEADING.captures(text))?;

    let merchant = caps.name("merchant")?.as_str().trim().to_string();
    let amount = parse_amount(caps.name("amount")?.as_str())?;
    let currency = normalize_currency(caps.name("currency")?.as_str());

    let draft = ModuleDraft::Finance {
        merchant: merchant.clone(),
        amount,
        currency: currency.clone(),
    };
    draft.validate().ok()?;

    Some(ReflexMatch {
        draft,
        keywords: vec![merchant.to_lowercase(), currency.to_lowercase()],
    })
}

fn match_crypto(text: &str) -> Option<ReflexMatch> {
    let caps = RE_CRYPTO.captures(text)?;

    let action = match caps.name("action")?.as_str().to_lowercase().as_str() {
        "buy" | "bought" | "comprei" => CryptoAction::Buy,
        _ => CryptoAction::Sell,
    };
    let amount = parse_amount(caps.name("amount")?.as_str())?;
    let symbol = caps.name("symbol")?.as_str().to_string();
    let price = caps.name("price").and_then(|p| parse_amount(p.as_str()));

    let draft = ModuleDraft::Crypto {
        action,
        symbol: symbol.clone(),
        amount,
        price,
    };
    draft.validate().ok()?;

    Some(ReflexMatch {
        draft,
        keywords: vec![symbol.to_lowercase()],
    })
}

fn match_link(text: &str) -> Option<ReflexMatch> {
    let url = RE_URL.find(text)?.as_str().trim_end_matches([',', '.', ')']);

    // Whatever surrounds the URL becomes the title
    let title = text.replace(url, "");
    let title = title.trim().trim_matches(['-', ':', '—']).trim();
    let title = (!title.is_empty()).then(|| title.to_string());

    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    let draft = ModuleDraft::Links {
        url: url.to_string(),
        title,
    };
    draft.validate().ok()?;

    Some(ReflexMatch {
        draft,
        keywords: host.into_iter().collect(),
    })
}

fn match_todo(text: &str) -> Option<ReflexMatch> {
    let caps = RE_TODO.captures(text)?;
    let title = caps
        .name("title")
        .or_else(|| caps.name("title2"))?
        .as_str()
        .trim()
        .to_string();

    let draft = ModuleDraft::Todo {
        title: title.clone(),
    };
    draft.validate().ok()?;

    let keywords = title
        .split_whitespace()
        .take(3)
        .map(|w| w.to_lowercase())
        .collect();

    Some(ReflexMatch { draft, keywords })
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_common::TargetModule;

    #[test]
    fn finance_trailing_currency() {
        let matches = extract("Pizza Hut 12.50 EUR");
        assert_eq!(matches.len(), 1);
        match &matches[0].draft {
            ModuleDraft::Finance {
                merchant,
                amount,
                currency,
            } => {
                assert_eq!(merchant, "Pizza Hut");
                assert!((amount - 12.50).abs() < f64::EPSILON);
                assert_eq!(currency, "EUR");
            }
            other => panic!("expected finance draft, got {other:?}"),
        }
    }

    #[test]
    fn finance_symbol_and_comma_decimal() {
        let matches = extract("Farmácia Central 9,90 €");
        match &matches[0].draft {
            ModuleDraft::Finance {
                amount, currency, ..
            } => {
                assert!((amount - 9.90).abs() < 1e-9);
                assert_eq!(currency, "EUR");
            }
            other => panic!("expected finance draft, got {other:?}"),
        }
    }

    #[test]
    fn finance_leading_verb() {
        let matches = extract("paid 30 USD at Steam");
        match &matches[0].draft {
            ModuleDraft::Finance { merchant, .. } => assert_eq!(merchant, "Steam"),
            other => panic!("expected finance draft, got {other:?}"),
        }
    }

    #[test]
    fn crypto_with_price() {
        let matches = extract("bought 0.5 BTC at 61000");
        match &matches[0].draft {
            ModuleDraft::Crypto {
                action,
                symbol,
                amount,
                price,
            } => {
                assert_eq!(*action, CryptoAction::Buy);
                assert_eq!(symbol, "BTC");
                assert!((amount - 0.5).abs() < f64::EPSILON);
                assert_eq!(*price, Some(61000.0));
            }
            other => panic!("expected crypto draft, got {other:?}"),
        }
    }

    #[test]
    fn crypto_sell_without_price() {
        let matches = extract("sold 2 ETH");
        match &matches[0].draft {
            ModuleDraft::Crypto { action, price, .. } => {
                assert_eq!(*action, CryptoAction::Sell);
                assert_eq!(*price, None);
            }
            other => panic!("expected crypto draft, got {other:?}"),
        }
    }

    #[test]
    fn link_with_title() {
        let matches = extract("great pgvector intro https://example.com/post?id=3");
        match &matches[0].draft {
            ModuleDraft::Links { url, title } => {
                assert_eq!(url, "https://example.com/post?id=3");
                assert_eq!(title.as_deref(), Some("great pgvector intro"));
            }
            other => panic!("expected links draft, got {other:?}"),
        }
        assert_eq!(matches[0].keywords, vec!["example.com"]);
    }

    #[test]
    fn todo_prefix_forms() {
        for text in ["todo: water the plants", "remember to water the plants"] {
            let matches = extract(text);
            assert_eq!(matches[0].draft.target_module(), TargetModule::Todo);
            match &matches[0].draft {
                ModuleDraft::Todo { title } => assert_eq!(title, "water the plants"),
                other => panic!("expected todo draft, got {other:?}"),
            }
        }
    }

    #[test]
    fn no_reflex_on_vague_text() {
        assert!(extract("talvez marcar consulta").is_empty());
        assert!(extract("what a day").is_empty());
    }

    #[test]
    fn precedence_records_multiple_matches() {
        // Contains both a URL and a trailing amount-currency pattern
        let matches = extract("bought 1 SOL at 140 see https://example.com/trade");
        assert!(matches.len() >= 2);
        assert_eq!(matches[0].draft.target_module(), TargetModule::Crypto);
    }
}
