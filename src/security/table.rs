//! Table reference parser using nom.
//!
//! ```text
//! sales.orders as o
//! ─────┬────── ─┬ ┬
//!      │        │ └── SQL alias
//!      │        └── optional AS
//!      └── dotted table name
//! ```

use nom::{
    IResult,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{pair, preceded, terminated, tuple},
};

use crate::error::{QdefError, QdefResult};

/// A parsed `name [AS] alias` table reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    /// The alias token as written, including `as` if present (`"as o"`, `"o"`).
    pub alias: Option<String>,
}

impl TableRef {
    /// Same alias token, different table name.
    pub fn with_name(&self, name: &str) -> String {
        match &self.alias {
            Some(alias) => format!("{} {}", name, alias),
            None => name.to_string(),
        }
    }

    /// Bare alias identifier, without `as`.
    pub fn alias_ident(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .map(|a| a.rsplit(char::is_whitespace).next().unwrap_or(a))
    }
}

/// Parse a table reference string.
pub fn parse_table_ref(input: &str) -> QdefResult<TableRef> {
    let trimmed = input.trim();
    match table_ref(trimmed) {
        Ok(("", table)) => Ok(table),
        Ok((remaining, _)) => Err(QdefError::table(
            input,
            format!("unexpected trailing content '{}'", remaining),
        )),
        Err(_) => Err(QdefError::table(input, "not a table identifier")),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// `schema.table`, any depth.
fn dotted_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(identifier, many0(preceded(char('.'), identifier))))(input)
}

/// `as alias` or `alias`.
fn alias(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace1,
        recognize(pair(
            opt(terminated(tag_no_case("as"), multispace1)),
            identifier,
        )),
    )(input)
}

fn table_ref(input: &str) -> IResult<&str, TableRef> {
    let (input, (name, alias, _)) = tuple((dotted_name, opt(alias), multispace0))(input)?;
    Ok((
        input,
        TableRef {
            name: name.to_string(),
            alias: alias.map(|a| a.split_whitespace().collect::<Vec<_>>().join(" ")),
        },
    ))
}
