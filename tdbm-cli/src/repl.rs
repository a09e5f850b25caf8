use crate::fixture::Fixture;
use crate::{bean_to_json, parse_params_json};
use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::Path;
use std::time::Instant;
use tdbm_api::Value;
use tdbm_core::ResultIterator;
use tdbm_memory::MemoryConnection;

const HELP: &str = "Commands:
  .rewind              Run the query and move to the first bean
  .next                Move to the next bean
  .current             Show the bean under the cursor
  .all                 Rewind and print every bean
  .count               Beans in the current window
  .fullcount           Rows matching the query, ignoring limit and offset
  .limit [n]           Set or clear the limit
  .offset [n]          Set or clear the offset
  .param <name> <json> Set one parameter
  .params <json>       Replace every parameter
  .cache               Number of beans in the identity cache
  .exit, .quit         Exit the REPL";

pub fn run_repl(fixture_path: &Path, query: &str) -> Result<()> {
    println!("TDBM REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Query `{query}`. Type .help for instructions, .exit to quit.\n");

    let fixture = Fixture::load(fixture_path)?;
    let conn = fixture.connection();
    let session = fixture.session();
    let mut it = fixture.iterator(&conn, &session, query)?;

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("tdbm> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
                match command {
                    ".exit" | ".quit" => {
                        println!("Bye!");
                        break;
                    }
                    ".help" => println!("{HELP}"),
                    _ => {
                        if let Err(e) = dispatch(&mut it, command, rest.trim()) {
                            println!("Error: {e:#}");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    Ok(())
}

fn dispatch(it: &mut ResultIterator<MemoryConnection>, command: &str, arg: &str) -> Result<()> {
    match command {
        ".rewind" => {
            it.rewind()?;
            print_current(it);
        }
        ".next" => {
            it.next()?;
            print_current(it);
        }
        ".current" => print_current(it),
        ".all" => {
            let start = Instant::now();
            let beans = it.to_vec()?;
            for (key, bean) in beans.iter().enumerate() {
                println!("{key}: {}", bean_to_json(bean));
            }
            println!("({} beans, {:.4}s)", beans.len(), start.elapsed().as_secs_f64());
        }
        ".count" => println!("{}", it.count()?),
        ".fullcount" => println!("{}", it.full_count()?),
        ".limit" => {
            it.set_limit(parse_bound(arg)?);
        }
        ".offset" => {
            it.set_offset(parse_bound(arg)?);
        }
        ".param" => {
            let (name, raw) = arg
                .split_once(' ')
                .ok_or_else(|| anyhow::anyhow!("usage: .param <name> <json>"))?;
            let value: Value = serde_json::from_str(raw.trim())?;
            let mut params = it.params().clone();
            params.insert(name, value);
            it.set_parameters(params);
        }
        ".params" => {
            it.set_parameters(parse_params_json(arg)?);
        }
        ".cache" => println!("{}", it.session().cached_beans()),
        _ => println!("Unknown command: {command}"),
    }
    Ok(())
}

fn parse_bound(arg: &str) -> Result<Option<u64>> {
    if arg.is_empty() {
        return Ok(None);
    }
    Ok(Some(arg.parse()?))
}

fn print_current(it: &ResultIterator<MemoryConnection>) {
    match (it.key(), it.current()) {
        (Some(key), Some(bean)) => println!("{key}: {}", bean_to_json(bean)),
        _ if it.is_exhausted() => println!("(end of results)"),
        _ => println!("(not started, use .rewind)"),
    }
}
