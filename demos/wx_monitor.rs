use anyhow::{Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};

use wxconsole_proto::{Command, LinkSpec, Record, Station, StationConfig};

fn print_record(record: &Record) {
    match record {
        Record::Loop(c) => println!(
            "outside {:?} F, barometer {:?} inHg, wind {:?} mph @ {:?}",
            c.outside_temperature.get(),
            c.barometer.get(),
            c.wind_speed.get(),
            c.wind_direction.get(),
        ),
        Record::Archive(a) => println!(
            "archive {}: outside {:?} F, rain {:?} in",
            a.stamp,
            a.outside_temperature.get(),
            a.rainfall.get()
        ),
        Record::Version(v) => println!("firmware {}", v),
        Record::Diagnostics(d) => println!("{:?}", d),
        Record::Eeprom { offset, data } => println!("EEPROM {:#X}: {:02X?}", offset, data),
        other => println!("{:?}", other),
    }
}

fn cmd_lamps(args: &mut CmdScanner) -> Result<Command> {
    Ok(Command::lamps(args.next()? == "on"))
}

fn cmd_eeprom(args: &mut CmdScanner) -> Result<Command> {
    Ok(Command::eeprom_read(
        args.parse_hex()?,
        args.parse_next::<u16>()?,
    ))
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let spec: LinkSpec = args
        .next()
        .unwrap_or_else(|| "serial:/dev/ttyUSB0".to_string())
        .parse()?;

    let link = spec.open()?;
    let station = Station::start(link, StationConfig::default(), print_record)?;

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let mut scan = CmdScanner::new(&line);
        let command = match scan.next() {
            Err(_) => continue,
            Ok("quit") | Ok("q") => break,
            Ok("lamps") => cmd_lamps(&mut scan),
            Ok("version") => Ok(Command::version()),
            Ok("rxcheck") => Ok(Command::diagnostics()),
            Ok("hilows") => Ok(Command::extremes()),
            Ok("eeprom") => cmd_eeprom(&mut scan),
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        };
        match command {
            Ok(command) => station.queue().enqueue(command),
            Err(err) => println!("{:?}", err),
        }
    }

    station.shutdown();
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            splt: line.split_whitespace().peekable(),
        }
    }
    fn next(&mut self) -> Result<&'a str> {
        self.splt.next().context("End of stream")
    }
    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }
    fn parse_hex(&mut self) -> Result<u16> {
        let arg = self.next()?;
        u16::from_str_radix(arg.trim_start_matches("0x"), 16).context("Parse error")
    }
}
