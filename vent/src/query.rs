use derive_more::Display;

use crate::events::TaggedEvent;

/// A parsed event filter: a conjunction of tag predicates. The empty filter
/// matches every event.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Predicate {
    tag: String,
    op: Op,
    value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal,
    NotEqual,
    Contains,
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum QueryError {
    #[display(fmt = "unexpected character '{}' in filter", _0)]
    UnexpectedCharacter(char),
    #[display(fmt = "unterminated literal in filter")]
    UnterminatedLiteral,
    #[display(fmt = "expected a tag name")]
    ExpectedTag,
    #[display(fmt = "expected an operator after tag '{}'", _0)]
    ExpectedOperator(String),
    #[display(fmt = "expected a quoted literal after operator")]
    ExpectedLiteral,
    #[display(fmt = "expected AND between predicates")]
    ExpectedConjunction,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Equal,
    NotEqual,
    Contains,
    And,
    Literal(String),
}

impl Query {
    pub fn parse(input: &str) -> Result<Query, QueryError> {
        let tokens = tokenize(input)?;
        let mut predicates = Vec::new();
        let mut tokens = tokens.into_iter().peekable();

        while let Some(token) = tokens.next() {
            let tag = match token {
                Token::Ident(tag) => tag,
                _ => return Err(QueryError::ExpectedTag),
            };

            let op = match tokens.next() {
                Some(Token::Equal) => Op::Equal,
                Some(Token::NotEqual) => Op::NotEqual,
                Some(Token::Contains) => Op::Contains,
                _ => return Err(QueryError::ExpectedOperator(tag)),
            };

            let value = match tokens.next() {
                Some(Token::Literal(value)) => value,
                _ => return Err(QueryError::ExpectedLiteral),
            };

            predicates.push(Predicate { tag, op, value });

            match tokens.next() {
                None => break,
                Some(Token::And) => {
                    if tokens.peek().is_none() {
                        return Err(QueryError::ExpectedTag);
                    }
                }
                Some(_) => return Err(QueryError::ExpectedConjunction),
            }
        }

        Ok(Query { predicates })
    }

    /// True when every predicate holds. A predicate over a missing tag never
    /// holds, whatever its operator.
    pub fn matches(&self, event: &TaggedEvent) -> bool {
        self.predicates.iter().all(|predicate| {
            event.get(&predicate.tag).is_some_and(|value| match predicate.op {
                Op::Equal => value == predicate.value,
                Op::NotEqual => value != predicate.value,
                Op::Contains => value.contains(&predicate.value),
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {}
            '=' => tokens.push(Token::Equal),
            '!' => match chars.next() {
                Some('=') => tokens.push(Token::NotEqual),
                _ => return Err(QueryError::UnexpectedCharacter('!')),
            },
            '\'' => {
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => literal.push(c),
                        None => return Err(QueryError::UnterminatedLiteral),
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "AND" => Token::And,
                    "CONTAINS" => Token::Contains,
                    _ => Token::Ident(ident),
                });
            }
            c => return Err(QueryError::UnexpectedCharacter(c)),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHeader, EventRecord, EventType, LogEvent};
    use ethers::types::H256;

    fn log_event() -> TaggedEvent {
        let mut raw = [0u8; 32];
        raw[..10].copy_from_slice(b"EVENT_TEST");

        EventRecord {
            header: EventHeader {
                height: 7,
                tx_hash: vec![1; 20],
                index: 0,
                event_type: EventType::Log,
            },
            log: LogEvent {
                topics: vec![H256::zero(), H256::from(raw)],
                data: vec![],
            },
        }
        .tagged()
    }

    #[test]
    fn matches_equality_predicates() {
        let query = Query::parse("EventType = 'LogEvent'").unwrap();
        assert!(query.matches(&log_event()));

        let query = Query::parse("EventType = 'CallEvent'").unwrap();
        assert!(!query.matches(&log_event()));
    }

    #[test]
    fn matches_conjunctions() {
        let query = Query::parse("EventType = 'LogEvent' AND Log1Text = 'EVENT_TEST'").unwrap();
        assert!(query.matches(&log_event()));

        let query = Query::parse("EventType = 'LogEvent' AND Log1Text = 'OTHER'").unwrap();
        assert!(!query.matches(&log_event()));
    }

    #[test]
    fn supports_negation_and_contains() {
        let query = Query::parse("Height != '8'").unwrap();
        assert!(query.matches(&log_event()));

        let query = Query::parse("Log1Text CONTAINS 'EVENT'").unwrap();
        assert!(query.matches(&log_event()));
    }

    #[test]
    fn missing_tags_never_match() {
        let query = Query::parse("Log5Text != 'whatever'").unwrap();
        assert!(!query.matches(&log_event()));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let query = Query::parse("").unwrap();
        assert!(query.is_empty());
        assert!(query.matches(&log_event()));
    }

    #[test]
    fn rejects_malformed_filters() {
        assert_eq!(
            Query::parse("EventType = LogEvent"),
            Err(QueryError::ExpectedLiteral)
        );
        assert_eq!(
            Query::parse("EventType = 'LogEvent"),
            Err(QueryError::UnterminatedLiteral)
        );
        assert_eq!(
            Query::parse("EventType = 'LogEvent' AND"),
            Err(QueryError::ExpectedTag)
        );
        assert_eq!(
            Query::parse("EventType ? 'LogEvent'"),
            Err(QueryError::UnexpectedCharacter('?'))
        );
    }
}
