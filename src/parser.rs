// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    multi::separated_list0,
    sequence::delimited,
    IResult,
};

/// One non-empty `|`-delimited segment of an input line.
#[derive(Debug, PartialEq)]
pub(crate) enum Segment<'a> {
    Exit,
    ChangeDirectory(Option<&'a str>),
    Pwd,
    External { name: &'a str, parameters: Vec<&'a str> },
}

impl<'a> Segment<'a> {
    fn from_words(words: Vec<&'a str>) -> Option<Segment<'a>> {
        let (&name, parameters) = words.split_first()?;

        Some(match name {
            "exit" => Segment::Exit,
            "cd" => Segment::ChangeDirectory(parameters.first().copied()),
            "pwd" => Segment::Pwd,
            _ => Segment::External {
                name,
                parameters: parameters.to_vec(),
            },
        })
    }
}

/// Splits `input` on `|` and every segment on whitespace. Segments without
/// any word are dropped.
pub(crate) fn parse(input: &str) -> IResult<&str, Vec<Segment>> {
    let (i, segments) = separated_list0(char('|'), words)(input)?;

    Ok((
        i,
        segments.into_iter().filter_map(Segment::from_words).collect(),
    ))
}

fn is_word_char(chr: char) -> bool {
    !chr.is_whitespace() && chr != '|'
}

fn words(input: &str) -> IResult<&str, Vec<&str>> {
    let blank0 = take_while(char::is_whitespace);
    let blank1 = take_while1(char::is_whitespace);
    let word = take_while1(is_word_char);

    // the combined parser borrows `blank0`, so it has to finish before they drop
    #[allow(clippy::let_and_return)]
    let result = delimited(&blank0, separated_list0(blank1, word), &blank0)(input);
    result
}

#[cfg(test)]
mod tests {
    use super::Segment;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            super::parse("foo bar"),
            Ok((
                "",
                vec![Segment::External {
                    name: "foo",
                    parameters: vec!["bar"]
                }]
            ))
        );
    }

    #[test]
    fn test_parse_pipeline() {
        assert_eq!(
            super::parse(" ls -l |grep  rs| wc\t-l "),
            Ok((
                "",
                vec![
                    Segment::External {
                        name: "ls",
                        parameters: vec!["-l"]
                    },
                    Segment::External {
                        name: "grep",
                        parameters: vec!["rs"]
                    },
                    Segment::External {
                        name: "wc",
                        parameters: vec!["-l"]
                    },
                ]
            ))
        );
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        assert_eq!(
            super::parse("| echo a ||  | cat |"),
            Ok((
                "",
                vec![
                    Segment::External {
                        name: "echo",
                        parameters: vec!["a"]
                    },
                    Segment::External {
                        name: "cat",
                        parameters: vec![]
                    },
                ]
            ))
        );
        assert_eq!(super::parse(" |  | "), Ok(("", vec![])));
        assert_eq!(super::parse(""), Ok(("", vec![])));
    }

    #[test]
    fn test_parse_builtins() {
        assert_eq!(
            super::parse("cd /tmp extra | pwd | exit now"),
            Ok((
                "",
                vec![
                    Segment::ChangeDirectory(Some("/tmp")),
                    Segment::Pwd,
                    Segment::Exit
                ]
            ))
        );
        assert_eq!(
            super::parse("cd"),
            Ok(("", vec![Segment::ChangeDirectory(None)]))
        );
    }

    #[test]
    fn test_parse_keeps_quotes_verbatim() {
        assert_eq!(
            super::parse("echo \"a b\" 'c'"),
            Ok((
                "",
                vec![Segment::External {
                    name: "echo",
                    parameters: vec!["\"a", "b\"", "'c'"]
                }]
            ))
        );
    }

    #[test]
    fn test_parse_unicode_whitespace() {
        assert_eq!(
            super::parse("echo\u{a0}x"),
            Ok((
                "",
                vec![Segment::External {
                    name: "echo",
                    parameters: vec!["x"]
                }]
            ))
        );
    }
}
