// Copyright (C) 2026 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of hotboard.
//
// hotboard is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// hotboard is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with hotboard.  If not,
// see <http://www.gnu.org/licenses/>.

//! # util
//!
//! Odds & ends shared between the library & the daemon.

use itertools::Itertools;
use secrecy::SecretString;
use serde::Deserialize;
use tap::Pipe;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      generic credentials                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Username & password for a backing store
///
/// In configuration, give these as a two-element array; on the command line (or in the
/// environment), as "username,password".
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl Credentials {
    /// Split "username,password" into [Credentials]; anything other than exactly two fields is
    /// rejected
    pub fn parse(text: &str) -> Option<Credentials> {
        text.split(',')
            .collect_tuple::<(&str, &str)>()
            .map(|(user, pass)| (user.into(), pass.into()))
            .map(Credentials)
    }
}

impl From<Credentials> for (SecretString, SecretString) {
    fn from(value: Credentials) -> Self {
        value.0
    }
}

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .pipe(Credentials::parse)
            .ok_or(clap::Error::new(ErrorKind::WrongNumberOfValues))
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use clap::{Arg, Command, value_parser};
    use secrecy::ExposeSecret;

    #[test]
    fn credentials() {
        let Credentials((user, pass)) = Credentials::parse("cassandra,s3kr1t").unwrap();
        assert_eq!(user.expose_secret(), "cassandra");
        assert_eq!(pass.expose_secret(), "s3kr1t");

        assert!(Credentials::parse("cassandra").is_none());
        assert!(Credentials::parse("a,b,c").is_none());

        let cmd = Command::new("test").arg(
            Arg::new("credentials")
                .long("credentials")
                .value_parser(value_parser!(Credentials)),
        );
        let matches = cmd
            .clone()
            .try_get_matches_from(["test", "--credentials", "u,p"])
            .unwrap(/* known good */);
        let Credentials((user, _)) = matches
            .get_one::<Credentials>("credentials")
            .cloned()
            .unwrap();
        assert_eq!(user.expose_secret(), "u");
        assert!(
            cmd.try_get_matches_from(["test", "--credentials", "u"])
                .is_err()
        );

        let creds: Credentials = toml::from_str::<toml::Table>(r#"c = ["u", "p"]"#)
            .unwrap()
            .get("c")
            .cloned()
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(creds.0.1.expose_secret(), "p");
    }
}
