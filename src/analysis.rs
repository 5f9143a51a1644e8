//! Text analysis shared by ingestion, querying and highlighting.

/// A lowercased term and the byte span it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub start: usize,
    pub end: usize,
}

/// Splits `text` on non-alphanumeric characters and lowercases each word.
///
/// Apostrophes are kept when they sit between two word characters, so `o'er` and
/// `who's` survive as single terms while quoting apostrophes are dropped.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut start: Option<usize> = None;

    while let Some((idx, ch)) = chars.next() {
        let is_word = ch.is_alphanumeric()
            || (ch == '\''
                && start.is_some()
                && chars.peek().is_some_and(|(_, next)| next.is_alphanumeric()));
        match (is_word, start) {
            (true, None) => start = Some(idx),
            (false, Some(begin)) => {
                tokens.push(token(text, begin, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        tokens.push(token(text, begin, text.len()));
    }
    tokens
}

/// Only the terms of [`tokenize`], in order.
pub fn terms(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|token| token.term).collect()
}

fn token(text: &str, start: usize, end: usize) -> Token {
    Token {
        term: text[start..end].to_lowercase(),
        start,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_splits_on_punctuation() {
        assert_eq!(
            terms("To be, or not to be: that is the Question."),
            vec!["to", "be", "or", "not", "to", "be", "that", "is", "the", "question"]
        );
    }

    #[test]
    fn keeps_inner_apostrophes_only() {
        assert_eq!(terms("'Tis o'er, who's there'"), vec!["tis", "o'er", "who's", "there"]);
    }

    #[test]
    fn spans_point_back_into_the_source() {
        let text = "  Enter HAMLET.";
        let tokens = tokenize(text);
        assert_eq!(tokens.len(), 2);
        assert_eq!(&text[tokens[1].start..tokens[1].end], "HAMLET");
        assert_eq!(tokens[1].term, "hamlet");
    }

    #[test]
    fn handles_multibyte_text() {
        let tokens = tokenize("🙂 Æneas façade");
        assert_eq!(tokens[0].term, "æneas");
        assert_eq!(tokens[1].term, "façade");
        assert_eq!(tokens[1].end, "🙂 Æneas façade".len());
    }

    #[test]
    fn empty_text_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" .,;-- ").is_empty());
    }
}
