/// signal.rs — TradingView strategy alert text → `Signal`
///
/// Two order-fill alert layouts are recognised, anywhere in the text:
///
///   JA: `<name>: <TICKER> で <BUY|SELL|buy|sell> @ <price> の注文が約定しました。新しいストラテジーポジションは <pos> です`
///   EN: `order <buy|sell> @ <contracts> filled on <TICKER>. New strategy position is <pos>`
///
/// Matching is on whitespace-separated tokens, so line breaks and repeated
/// spaces between fields are accepted, as is trailing text after `です`.
/// The alert price is informational; an unreadable one is dropped.
use crate::error::ParseError;
use crate::models::{Direction, Signal};

const JA_FILLED: &str = "の注文が約定しました。新しいストラテジーポジションは";
const JA_OF: &str = "で";
const JA_END: &str = "です";

/// Longest excerpt of an unrecognised message echoed into errors/logs.
const EXCERPT_CHARS: usize = 120;

pub fn parse_signal(raw: &str) -> Result<Signal, ParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if let Some(signal) = match_japanese(&tokens) {
        return Ok(signal);
    }
    if let Some(signal) = match_english(&tokens) {
        return Ok(signal);
    }
    Err(ParseError::UnrecognizedFormat(excerpt(text)))
}

fn match_japanese(tokens: &[&str]) -> Option<Signal> {
    // [".. :", TICKER, で, ACTION, @, PRICE, <filled>, POS, です]
    for w in tokens.windows(9) {
        let shape = w[0].ends_with(':')
            && is_ticker(w[1])
            && w[2] == JA_OF
            && w[4] == "@"
            && is_unsigned_number(w[5])
            && w[6] == JA_FILLED
            && is_signed_number(w[7])
            && w[8].starts_with(JA_END);
        if !shape {
            continue;
        }
        let direction = match w[3] {
            "BUY" | "buy" => Direction::Long,
            "SELL" | "sell" => Direction::Short,
            _ => continue,
        };
        return Some(Signal {
            ticker: w[1].to_owned(),
            direction,
            alert_price: w[5].parse::<f64>().ok(),
        });
    }
    None
}

fn match_english(tokens: &[&str]) -> Option<Signal> {
    // [order, ACTION, @, QTY, filled, on, TICKER., New, strategy, position, is, POS]
    for w in tokens.windows(12) {
        let ticker = w[6].strip_suffix('.').unwrap_or(w[6]);
        let shape = w[0].eq_ignore_ascii_case("order")
            && w[2] == "@"
            && is_unsigned_number(w[3])
            && w[4] == "filled"
            && w[5] == "on"
            && is_ticker(ticker)
            && w[7].eq_ignore_ascii_case("new")
            && w[8] == "strategy"
            && w[9] == "position"
            && w[10] == "is"
            && is_signed_number(w[11].trim_end_matches('.'));
        if !shape {
            continue;
        }
        let direction = match w[1].to_ascii_lowercase().as_str() {
            "buy" => Direction::Long,
            "sell" => Direction::Short,
            _ => continue,
        };
        return Some(Signal {
            ticker: ticker.to_owned(),
            direction,
            alert_price: None,
        });
    }
    None
}

fn is_ticker(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn is_unsigned_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn is_signed_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const JA_BUY: &str = "Vortex Strategy (14): ETHUSD で BUY @ 2012.5 の注文が約定しました。\
                          新しいストラテジーポジションは 1.5 です";

    #[test]
    fn parses_japanese_buy() {
        let sig = parse_signal(JA_BUY).unwrap();
        assert_eq!(sig.ticker, "ETHUSD");
        assert_eq!(sig.direction, Direction::Long);
        assert_eq!(sig.alert_price, Some(2012.5));
    }

    #[test]
    fn parses_japanese_lowercase_sell_across_lines() {
        let msg = "EMA cross:\n  BTCUSDT.P\tで sell @ 64000 \
                   の注文が約定しました。新しいストラテジーポジションは -0.25 です";
        // '.' is not a ticker character
        assert!(parse_signal(msg).is_err());

        let msg = "EMA cross:\n  BTCUSDT\tで sell @ 64000 \
                   の注文が約定しました。新しいストラテジーポジションは -0.25 です";
        let sig = parse_signal(msg).unwrap();
        assert_eq!(sig.direction, Direction::Short);
        assert_eq!(sig.ticker, "BTCUSDT");
    }

    #[test]
    fn mixed_case_action_is_rejected_in_japanese_layout() {
        let msg = JA_BUY.replace("BUY", "Buy");
        assert!(matches!(parse_signal(&msg), Err(ParseError::UnrecognizedFormat(_))));
    }

    #[test]
    fn malformed_price_still_yields_direction() {
        let msg = JA_BUY.replace("2012.5", "20.1.2");
        let sig = parse_signal(&msg).unwrap();
        assert_eq!(sig.direction, Direction::Long);
        assert_eq!(sig.alert_price, None);
    }

    #[test]
    fn trailing_text_after_desu_is_accepted() {
        let sig = parse_signal(&format!("{JA_BUY}。")).unwrap();
        assert_eq!(sig.ticker, "ETHUSD");
        assert_eq!(sig.direction, Direction::Long);

        let msg = JA_BUY.replace("BUY", "SELL").replace(" です", " です (id 7)");
        let sig = parse_signal(&msg).unwrap();
        assert_eq!(sig.direction, Direction::Short);
        assert_eq!(sig.alert_price, Some(2012.5));
    }

    #[test]
    fn parses_english_sell() {
        let msg = "order sell @ 1 filled on ETHUSDT. New strategy position is -1";
        let sig = parse_signal(msg).unwrap();
        assert_eq!(sig.direction, Direction::Short);
        assert_eq!(sig.ticker, "ETHUSDT");
        assert_eq!(sig.alert_price, None);
    }

    #[test]
    fn empty_and_garbage() {
        assert_eq!(parse_signal("   \n"), Err(ParseError::Empty));
        assert!(matches!(
            parse_signal("hello world"),
            Err(ParseError::UnrecognizedFormat(m)) if m == "hello world"
        ));
    }

    #[test]
    fn long_garbage_is_truncated_in_error() {
        let msg = "x".repeat(500);
        match parse_signal(&msg) {
            Err(ParseError::UnrecognizedFormat(m)) => assert_eq!(m.chars().count(), EXCERPT_CHARS + 1),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
