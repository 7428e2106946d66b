use anyhow::{Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::net::TcpStream;
use std::str::{FromStr, SplitWhitespace};
use std::sync::Arc;
use std::time::Duration;

use helios_proto::{Bridge, BridgeConfig, DecodedValue};

fn cmd_get(args: &mut CmdScanner, bridge: &Bridge) -> Result<()> {
    let name = args.next()?;
    match bridge.read_variable(name) {
        Some(value) => println!("{} = {}", name, value),
        None => {
            bridge.request_variable(name)?;
            println!("{} not known yet, read requested", name);
        }
    }
    Ok(())
}

fn parse_value(text: &str) -> Result<DecodedValue> {
    Ok(match text {
        "on" | "true" => true.into(),
        "off" | "false" => false.into(),
        list if list.contains(',') => list
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .context("Parse error")?
            .into(),
        number => number.parse::<f64>().context("Parse error")?.into(),
    })
}

fn cmd_set(args: &mut CmdScanner, bridge: &Bridge) -> Result<()> {
    let name = args.next()?;
    let value = parse_value(args.next()?)?;
    bridge.write_variable(name, value)?;
    println!("queued");
    Ok(())
}

fn cmd_cal(args: &mut CmdScanner, bridge: &Bridge) -> Result<()> {
    let day: u8 = args.parse_next()?;
    let name = format!("calendar_{}", helios_proto::Weekday::new(day)?.short_name());
    match bridge.read_variable(&name).as_ref().and_then(DecodedValue::as_calendar) {
        Some(calendar) => println!("{:?}", calendar),
        None => {
            bridge.request_calendar_day(day)?;
            println!("{} not known yet, read requested", name);
        }
    }
    Ok(())
}

/// `setcal <day> <48 digits>`, spaces between the digits are allowed.
fn cmd_setcal(args: &mut CmdScanner, bridge: &Bridge) -> Result<()> {
    let day: u8 = args.parse_next()?;
    let mut levels = Vec::with_capacity(48);
    while let Ok(group) = args.next() {
        for c in group.chars() {
            levels.push(c.to_digit(10).context("Levels must be digits")? as u8);
        }
    }
    bridge.write_calendar_day(day, &levels)?;
    println!("queued");
    Ok(())
}

fn cmd_scan(bridge: &Bridge) -> Result<()> {
    println!("Scanning, this takes about a minute.");
    let rows = bridge.trigger_diagnostic_scan()?;
    for row in rows {
        println!("{}", row);
    }
    Ok(())
}

fn cmd_stats(bridge: &Bridge) {
    println!("{:?}", bridge.stream_stats());
    print!("{}", bridge.traffic_summary());
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let address = args.next().unwrap_or_else(|| "192.168.1.50:8234".to_string());

    let stream = TcpStream::connect(&address)
        .with_context(|| format!("Failed to connect to {}", address))?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    let writer = stream.try_clone()?;

    let bridge = Arc::new(Bridge::start(BridgeConfig::default(), writer)?);
    {
        let bridge = Arc::clone(&bridge);
        let mut stream = stream;
        std::thread::spawn(move || {
            if let Err(e) = bridge.pump(&mut stream) {
                eprintln!("Connection lost: {}", e);
            }
        });
    }

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        let mut scan = CmdScanner::read_stdin(&mut cmd)?;
        if let Err(err) = match scan.next() {
            Err(_) => continue,
            Ok("get") | Ok("g") => cmd_get(&mut scan, &bridge),
            Ok("set") | Ok("s") => cmd_set(&mut scan, &bridge),
            Ok("cal") => cmd_cal(&mut scan, &bridge),
            Ok("setcal") => cmd_setcal(&mut scan, &bridge),
            Ok("scan") => cmd_scan(&bridge),
            Ok("stats") => {
                cmd_stats(&bridge);
                Ok(())
            }
            Ok("log") => {
                bridge.enable_traffic_log();
                Ok(())
            }
            Ok("quit") | Ok("q") => break,
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        } {
            println!("{:#}", err)
        }
    }
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn read_stdin(buf: &'a mut String) -> Result<Self> {
        buf.clear();
        std::io::stdin().read_line(buf)?;
        let splt = buf.split_whitespace().peekable();
        Ok(Self { splt })
    }
    fn next(&mut self) -> Result<&'a str> {
        self.splt.next().context("End of line")
    }
    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }
}
