//! Parser for the protobuf text format used by `.prototxt` network
//! definitions. Produces a generic field tree; interpretation into the layer
//! IR happens in [`super::from_caffe`].

use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::character::complete::{char, digit1, multispace1, one_of, satisfy};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::error::Error;
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{IResult, Parser};

use crate::error::{ImportError, Result};

/// A parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f32),
    Bool(bool),
    /// Bare identifier, e.g. `phase: TEST` or `pool: MAX`.
    Enum(String),
    Message(Document),
}

/// One `name: value` or `name { ... }` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// An ordered list of fields. Repeated field names are kept as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub fields: Vec<Field>,
}

impl Document {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.fields.iter().filter(move |f| f.name == name).map(|f| &f.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_message(&self, name: &str) -> Option<&Document> {
        self.get(name).and_then(Value::as_message)
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Document> {
        match self {
            Value::Message(d) => Some(d),
            _ => None,
        }
    }
}

/// Parse a whole prototxt document.
pub fn parse_document(text: &str) -> Result<Document> {
    all_consuming(terminated(fields, sp))
        .parse(text)
        .map(|(_, d)| d)
        .map_err(|e| ImportError::Parse(format!("prototxt syntax error: {e}")))
}

type In<'s> = &'s str;

// Whitespace and `#` line comments.
fn sp(i: In) -> IResult<In, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(char('#'), opt(is_not("\n\r")))),
        ))),
    )
    .parse(i)
}

fn spaced<'s, O>(
    parser: impl Parser<In<'s>, Output = O, Error = Error<In<'s>>>,
) -> impl Parser<In<'s>, Output = O, Error = Error<In<'s>>> {
    preceded(sp, parser)
}

fn identifier(i: In) -> IResult<In, In> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        many0(satisfy(|c| c.is_ascii_alphanumeric() || c == '_')),
    ))
    .parse(i)
}

fn quoted_string(i: In) -> IResult<In, String> {
    delimited(
        char('"'),
        map(opt(is_not("\"")), |s: Option<In>| s.unwrap_or("").to_string()),
        char('"'),
    )
    .parse(i)
}

fn number(i: In) -> IResult<In, Value> {
    map_res(
        recognize((
            opt(one_of("+-")),
            digit1,
            opt(pair(char('.'), opt(digit1))),
            opt((one_of("eE"), opt(one_of("+-")), digit1)),
        )),
        |text: In| -> std::result::Result<Value, std::num::ParseFloatError> {
            if text.contains(['.', 'e', 'E']) {
                Ok(Value::Float(text.parse()?))
            } else {
                // Fall back to float on i64 overflow.
                match text.parse::<i64>() {
                    Ok(v) => Ok(Value::Int(v)),
                    Err(_) => Ok(Value::Float(text.parse()?)),
                }
            }
        },
    )
    .parse(i)
}

fn scalar(i: In) -> IResult<In, Value> {
    alt((
        map(quoted_string, Value::String),
        number,
        map(identifier, |s: In| match s {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Enum(s.to_string()),
        }),
    ))
    .parse(i)
}

fn message(i: In) -> IResult<In, Document> {
    delimited(spaced(char('{')), fields, spaced(char('}'))).parse(i)
}

fn field(i: In) -> IResult<In, Field> {
    let (i, name) = spaced(identifier).parse(i)?;
    // The colon is mandatory before a scalar and optional before a message.
    let (i, value) = alt((
        preceded(spaced(char(':')), spaced(scalar)),
        map(preceded(opt(spaced(char(':'))), message), Value::Message),
    ))
    .parse(i)?;
    Ok((i, Field { name: name.to_string(), value }))
}

fn fields(i: In) -> IResult<In, Document> {
    map(many0(field), |fields| Document { fields }).parse(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_messages() {
        let doc = parse_document(
            r#"
            name: "LeNet"   # a comment
            layer {
              name: "conv1"
              type: "Convolution"
              bottom: "data"
              convolution_param {
                num_output: 20
                kernel_size: 5
                weight_decay: 0.5
              }
              include { phase: TEST }
            }
            "#,
        )
        .unwrap();

        assert_eq!(doc.get_str("name"), Some("LeNet"));
        let layer = doc.get_message("layer").unwrap();
        assert_eq!(layer.get_str("type"), Some("Convolution"));
        let conv = layer.get_message("convolution_param").unwrap();
        assert_eq!(conv.get_i64("num_output"), Some(20));
        assert_eq!(conv.get("weight_decay"), Some(&Value::Float(0.5)));
        let include = layer.get_message("include").unwrap();
        assert_eq!(include.get("phase").and_then(Value::as_enum), Some("TEST"));
    }

    #[test]
    fn keeps_repeated_fields_in_order() {
        let doc = parse_document(r#"bottom: "a" bottom: "b" top: "c""#).unwrap();
        let bottoms: Vec<_> = doc.get_all("bottom").filter_map(Value::as_str).collect();
        assert_eq!(bottoms, vec!["a", "b"]);
    }

    #[test]
    fn negative_and_exponent_numbers() {
        let doc = parse_document("alpha: -1.5e-4 beta: 2").unwrap();
        assert_eq!(doc.get("alpha"), Some(&Value::Float(-1.5e-4)));
        assert_eq!(doc.get("beta"), Some(&Value::Int(2)));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_document("name: \"x\" }").is_err());
    }

    #[test]
    fn message_without_colon() {
        let doc = parse_document("input_param { shape { dim: 1 dim: 3 } }").unwrap();
        let shape = doc
            .get_message("input_param")
            .and_then(|p| p.get_message("shape"))
            .unwrap();
        let dims: Vec<_> = shape.get_all("dim").filter_map(Value::as_i64).collect();
        assert_eq!(dims, vec![1, 3]);
    }
}
