//! Logos-based tokenizer for torrent release names.
//!
//! Each variant of [`Token`] corresponds to a keyword or structural element
//! that matters when ranking stream candidates: resolutions, episode
//! signatures, years, runtimes and audio-language tags. Everything else
//! lexes as a plain word or number. Keyword patterns are case-insensitive.
//!
//! Patterns never span a separator. Markers written with one ("Season 3",
//! "S01 E02", "S01E02-E03", "136 min") are rejoined after lexing.

use logos::Logos;

/// Token types emitted by the lexer.
///
/// Logos prefers the longest match, then the higher priority, so keywords
/// beat [`Token::Word`] only when they cover the whole word.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token<'src> {
    // -----------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------
    /// 2160p, 1080p, 720p, 480p, 576p, 1080i.
    #[regex(r"(?i)(2160|1080|720|576|480)[pi]", priority = 10)]
    Resolution(&'src str),

    /// 4K / UHD markers.
    #[regex(r"(?i)(4k|uhd)", priority = 10)]
    Uhd(&'src str),

    // -----------------------------------------------------------------
    // Season / Episode
    // -----------------------------------------------------------------
    /// S01E02, S01E02E03. After joining also S01 E02, S01.E02, S01E02-E03.
    #[regex(r"(?i)S\d{1,2}E\d{1,3}(E\d{1,3})*", priority = 12)]
    SeasonEpisode(&'src str),

    /// 1x02 style signature.
    #[regex(r"\d{1,2}[xX]\d{2,3}", priority = 11)]
    CrossEpisode(&'src str),

    /// A bare season marker: S01. After joining also Season 1, Season.01.
    #[regex(r"(?i)S\d{1,2}", priority = 9)]
    Season(&'src str),

    /// The word "season". Only seen inside [`tokenize`]; it either joins a
    /// following number or is handed out as a [`Token::Word`].
    #[regex(r"(?i)season", priority = 6)]
    SeasonWord(&'src str),

    // -----------------------------------------------------------------
    // Year / runtime
    // -----------------------------------------------------------------
    /// Four-digit year 1900--2099.
    #[regex(r"(19|20)\d{2}", priority = 5)]
    Year(&'src str),

    /// Runtime: 136min, 2h16m. After joining also 136 min, 136 minutes.
    #[regex(r"(?i)(\d{1,3}min(s|utes)?|\dh\d{1,2}m(in)?)", priority = 8)]
    Runtime(&'src str),

    // -----------------------------------------------------------------
    // Audio language
    // -----------------------------------------------------------------
    /// Single-language audio tags.
    #[regex(
        r"(?i)(french|truefrench|vff|vfq|vfi|vf2|vf|english|eng|spanish|castellano|latino|esp|german|deutsch|ger|italian|ita|portuguese|dublado|por|russian|rus|japanese|jpn|korean|kor|hindi|hin)",
        priority = 7
    )]
    Language(&'src str),

    /// Multi-audio tags.
    #[regex(r"(?i)(multi|dual)", priority = 7)]
    MultiAudio(&'src str),

    // -----------------------------------------------------------------
    // Structural / separators
    // -----------------------------------------------------------------
    #[token(".")]
    Dot,

    #[token("-")]
    Hyphen,

    #[token("_")]
    Underscore,

    #[regex(r"[\[\]()]")]
    Bracket,

    /// Generic word token (lowest priority).
    #[regex(r"[a-zA-Z][a-zA-Z0-9']*", priority = 1)]
    Word(&'src str),

    /// Numeric token.
    #[regex(r"\d+", priority = 2)]
    Number(&'src str),
}

impl Token<'_> {
    /// Tokens that end the title portion of a release name.
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Token::Resolution(_)
                | Token::Uhd(_)
                | Token::SeasonEpisode(_)
                | Token::CrossEpisode(_)
                | Token::Season(_)
                | Token::Year(_)
        )
    }
}

/// A token together with the byte span it occupies in the original input.
#[derive(Debug, Clone)]
pub struct SpannedToken<'src> {
    pub token: Token<'src>,
    pub span: std::ops::Range<usize>,
}

/// Tokenize an input string, dropping characters no pattern covers.
pub fn tokenize(input: &str) -> Vec<SpannedToken<'_>> {
    let raw: Vec<SpannedToken<'_>> = Token::lexer(input)
        .spanned()
        .filter_map(|(result, span)| result.ok().map(|token| SpannedToken { token, span }))
        .collect();

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if let Some((joined, consumed)) = join_marker(input, &raw[i..]) {
            out.push(joined);
            i += consumed;
            continue;
        }
        let mut st = raw[i].clone();
        if let Token::SeasonWord(text) = st.token {
            st.token = Token::Word(text);
        }
        out.push(st);
        i += 1;
    }
    out
}

/// Join the marker starting at `window[0]` with the token after one
/// separator, returning it and how many raw tokens it covers.
fn join_marker<'src>(input: &'src str, window: &[SpannedToken<'src>]) -> Option<(SpannedToken<'src>, usize)> {
    let first = window.first()?;
    let (next_at, next) = window
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, t)| !matches!(t.token, Token::Dot | Token::Hyphen | Token::Underscore))?;
    let gap = input.get(first.span.end..next.span.start)?;

    let make: fn(&'src str) -> Token<'src> = match (&first.token, &next.token) {
        (Token::SeasonWord(_), Token::Number(n)) if n.len() <= 2 && matches!(gap, "" | " " | "." | "_") => {
            Token::Season
        }
        (Token::Season(_), Token::Word(w)) if is_episode_word(w) && matches!(gap, " " | ".") => {
            Token::SeasonEpisode
        }
        (Token::SeasonEpisode(_), Token::Word(w)) if is_episode_word(w) && gap == "-" => Token::SeasonEpisode,
        (Token::Number(n), Token::Word(w)) if n.len() <= 3 && gap == " " && is_minutes_word(w) => Token::Runtime,
        _ => return None,
    };

    let span = first.span.start..next.span.end;
    let token = make(input.get(span.clone())?);
    Some((SpannedToken { token, span }, next_at + 1))
}

/// `E02`, `e5`.
fn is_episode_word(word: &str) -> bool {
    let digits = word.strip_prefix(['E', 'e']).unwrap_or("");
    (1..=3).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_minutes_word(word: &str) -> bool {
    ["min", "mins", "minutes"].iter().any(|m| word.eq_ignore_ascii_case(m))
}
