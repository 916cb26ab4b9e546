//! vibedb-expr - command line front end for the pattern matcher and the
//! aggregate engine

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use vibedb_expr::aggregate::{AggregateAccumulator, AggregateFunction};
use vibedb_expr::pattern::{DefaultWordBreaker, FullTextQuery, LikePattern};
use vibedb_expr::value::{DataType, Value};

/// vibedb-expr - exercise LIKE, CONTAINS and aggregate evaluation
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Match case-sensitively
    #[arg(short, long, global = true)]
    case_sensitive: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match texts against a LIKE pattern with both engines
    Like {
        pattern: String,
        texts: Vec<String>,

        /// Escape character
        #[arg(short, long)]
        escape: Option<char>,
    },
    /// Run a whole-word CONTAINS search over texts
    Contains { condition: String, texts: Vec<String> },
    /// Aggregate a list of numbers
    Aggregate {
        /// COUNT, SUM, AVG, MIN, MAX, STDEV, STDEVP, VAR or VARP
        function: String,

        #[arg(allow_negative_numbers = true)]
        numbers: Vec<String>,

        /// Serialize the partial state after this many numbers and merge it
        /// into a second accumulator
        #[arg(short, long)]
        split: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Like {
            pattern,
            texts,
            escape,
        } => run_like(&pattern, escape, &texts, args.case_sensitive),
        Command::Contains { condition, texts } => run_contains(&condition, &texts, args.case_sensitive),
        Command::Aggregate {
            function,
            numbers,
            split,
        } => run_aggregate(&function, &numbers, split),
    }
}

fn run_like(pattern: &str, escape: Option<char>, texts: &[String], case_sensitive: bool) -> Result<()> {
    let compiled = LikePattern::compile(pattern, escape, case_sensitive)
        .with_context(|| format!("Failed to compile pattern '{}'", pattern))?;
    println!("pattern:      {}", compiled.source());
    println!("regex:        {}", compiled.regex().as_str());
    println!("optimization: {:?}", compiled.optimization_level());
    for text in texts {
        let by_regex = compiled.compare_with_regex(text);
        let by_scanner = compiled.compare_with_scanner(text);
        let marker = if by_regex == by_scanner { "" } else { "  (engines disagree)" };
        println!("{:<20} regex={} scanner={}{}", text, by_regex, by_scanner, marker);
    }
    Ok(())
}

fn run_contains(condition: &str, texts: &[String], case_sensitive: bool) -> Result<()> {
    let query = FullTextQuery::parse(condition, case_sensitive)
        .with_context(|| format!("Failed to parse condition '{}'", condition))?;
    for text in texts {
        println!("{:<40} {}", text, query.matches(text, &DefaultWordBreaker));
    }
    Ok(())
}

fn run_aggregate(function: &str, numbers: &[String], split: Option<usize>) -> Result<()> {
    let Some(function) = AggregateFunction::from_name(function) else {
        bail!("Unknown aggregate function '{}'", function);
    };
    let (input_type, values) = parse_numbers(numbers)?;
    let split = split.unwrap_or(values.len()).min(values.len());
    let (head, tail) = values.split_at(split);

    let mut first = AggregateAccumulator::new(function, input_type)?;
    feed(&mut first, head)?;
    let state = first
        .serialize_state()
        .context("Failed to serialize partial state")?;
    log::debug!("partial state after {} values is {} bytes", head.len(), state.len());

    let mut second = AggregateAccumulator::new(function, input_type)?;
    feed(&mut second, tail)?;
    second
        .merge_state(&state)
        .context("Failed to merge partial state")?;

    let result = second.finish_group()?;
    println!("{}({} values) = {} ({})", function.name(), values.len(), result, second.result_type().name());
    Ok(())
}

/// Integers when every number parses as one, floats otherwise.
fn parse_numbers(numbers: &[String]) -> Result<(DataType, Vec<Value>)> {
    if let Ok(ints) = numbers.iter().map(|n| n.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
        return Ok((DataType::BigInt, ints.into_iter().map(Value::BigInt).collect()));
    }
    let floats = numbers
        .iter()
        .map(|n| n.parse::<f64>().with_context(|| format!("Invalid number '{}'", n)))
        .collect::<Result<Vec<_>>>()?;
    Ok((DataType::Float, floats.into_iter().map(Value::Float).collect()))
}

fn feed(accumulator: &mut AggregateAccumulator, values: &[Value]) -> Result<()> {
    accumulator.create_new_group(&Value::Null)?;
    for value in values {
        accumulator.add_row_to_group(value)?;
    }
    Ok(())
}
