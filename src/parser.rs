use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while},
    character::complete::{alpha1, char, multispace0, multispace1, one_of},
    combinator::{map, map_opt, map_res, opt, value},
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use uuid::Uuid;

use crate::model::Operation;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Calculate { operation: Operation, a: f64, b: f64 },
    History { operation: Option<Operation> },
    Get { id: Uuid },
    Update { id: Uuid, operation: Operation, a: f64, b: f64 },
    Delete { id: Uuid },
    Health,
    Version,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_operation(input: &str) -> IResult<&str, Operation> {
    map_res(alpha1, |s: &str| s.to_ascii_lowercase().parse::<Operation>())(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Operation> {
    map_opt(one_of("+-*/^%"), Operation::from_symbol)(input)
}

fn parse_uuid(input: &str) -> IResult<&str, Uuid> {
    let (input, uuid_str) = take_while(|c: char| c.is_ascii_hexdigit() || c == '-')(input)?;
    match Uuid::parse_str(uuid_str) {
        Ok(uuid) => Ok((input, uuid)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// A uuid, optionally in single quotes.
fn parse_id(input: &str) -> IResult<&str, Uuid> {
    delimited(opt(char('\'')), parse_uuid, opt(char('\'')))(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- EXPRESSIONS ---

/// `add 2 3` or `add 2, 3`
fn parse_prefix(input: &str) -> IResult<&str, (Operation, f64, f64)> {
    let (input, operation) = parse_operation(input)?;
    let (input, a) = preceded(multispace1, double)(input)?;
    let (input, b) = preceded(alt((value((), ws(char(','))), value((), multispace1))), double)(input)?;
    Ok((input, (operation, a, b)))
}

/// `2 + 3`, `2 ^ 10`, `10 % 3`
fn parse_infix(input: &str) -> IResult<&str, (Operation, f64, f64)> {
    map(tuple((double, ws(parse_symbol), double)), |(a, operation, b)| (operation, a, b))(input)
}

fn parse_expression(input: &str) -> IResult<&str, (Operation, f64, f64)> {
    alt((parse_prefix, parse_infix))(input)
}

// --- COMMAND PARSERS ---

fn parse_calculate(input: &str) -> IResult<&str, Command> {
    map(parse_expression, |(operation, a, b)| Command::Calculate { operation, a, b })(input)
}

fn parse_history(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HISTORY")(input)?;
    let (input, operation) = opt(preceded(multispace1, parse_operation))(input)?;
    Ok((input, Command::History { operation }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_id(input)?;
    Ok((input, Command::Get { id }))
}

fn parse_update(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("UPDATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_id(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = opt(tuple((tag_ci("SET"), multispace1)))(input)?;
    let (input, (operation, a, b)) = parse_expression(input)?;
    Ok((input, Command::Update { id, operation, a, b }))
}

fn parse_delete(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("DELETE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_id(input)?;
    Ok((input, Command::Delete { id }))
}

fn parse_keyword(input: &str) -> IResult<&str, Command> {
    alt((
        value(Command::Health, tag_ci("HEALTH")),
        value(Command::Version, tag_ci("VERSION")),
        value(Command::Help, tag_ci("HELP")),
        value(Command::Exit, alt((tag_ci("EXIT"), tag_ci("QUIT")))),
    ))(input)
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_history,
        parse_get,
        parse_update,
        parse_delete,
        parse_keyword,
        parse_calculate,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.chars().count() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    fn id() -> Uuid {
        Uuid::parse_str(ID).unwrap()
    }

    #[test]
    fn prefix_calculations() {
        assert_eq!(
            parse_command("add 2 3").unwrap(),
            Command::Calculate { operation: Operation::Add, a: 2.0, b: 3.0 }
        );
        assert_eq!(
            parse_command("  POWER 2, 10 ").unwrap(),
            Command::Calculate { operation: Operation::Power, a: 2.0, b: 10.0 }
        );
        assert_eq!(
            parse_command("divide -1.5 0.5").unwrap(),
            Command::Calculate { operation: Operation::Divide, a: -1.5, b: 0.5 }
        );
    }

    #[test]
    fn infix_calculations() {
        let cases = [
            ("2 + 3", Operation::Add, 2.0, 3.0),
            ("2-3", Operation::Subtract, 2.0, 3.0),
            ("-4 * 2.5", Operation::Multiply, -4.0, 2.5),
            ("10 / 4", Operation::Divide, 10.0, 4.0),
            ("2 ^ -1", Operation::Power, 2.0, -1.0),
            ("10 % 3", Operation::Modulo, 10.0, 3.0),
            ("1e3 + 1", Operation::Add, 1000.0, 1.0),
        ];
        for (input, operation, a, b) in cases {
            assert_eq!(parse_command(input).unwrap(), Command::Calculate { operation, a, b }, "{}", input);
        }
    }

    #[test]
    fn history_commands() {
        assert_eq!(parse_command("history").unwrap(), Command::History { operation: None });
        assert_eq!(
            parse_command("HISTORY modulo").unwrap(),
            Command::History { operation: Some(Operation::Modulo) }
        );
        assert_eq!(parse_command(&format!("GET '{}'", ID)).unwrap(), Command::Get { id: id() });
        assert_eq!(parse_command(&format!("delete {}", ID)).unwrap(), Command::Delete { id: id() });
        assert_eq!(
            parse_command(&format!("UPDATE {} SET power 2 10", ID)).unwrap(),
            Command::Update { id: id(), operation: Operation::Power, a: 2.0, b: 10.0 }
        );
        assert_eq!(
            parse_command(&format!("update {} 3 + 4", ID)).unwrap(),
            Command::Update { id: id(), operation: Operation::Add, a: 3.0, b: 4.0 }
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(parse_command("health").unwrap(), Command::Health);
        assert_eq!(parse_command("Version").unwrap(), Command::Version);
        assert_eq!(parse_command("HELP").unwrap(), Command::Help);
        assert_eq!(parse_command("quit").unwrap(), Command::Exit);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_command("sqrt 4 2").is_err());
        assert!(parse_command("add 2").is_err());
        assert!(parse_command("2 & 3").is_err());
        assert!(parse_command("GET not-a-uuid").is_err());
        assert!(parse_command("HISTORY sqrt").is_err());
        assert!(parse_command("add 2 3 4").unwrap_err().starts_with("Unexpected tokens"));
    }
}
