use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Instrument id reserved for the global configuration files.
pub const CONFIG_INSTRUMENT: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    File,
    Urls,
    Cmdfile,
    Chat,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::File => "file",
            Category::Urls => "urls",
            Category::Cmdfile => "cmdfile",
            Category::Chat => "chat",
        }
    }
}

impl FromStr for Category {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Category::File),
            "urls" => Ok(Category::Urls),
            "cmdfile" => Ok(Category::Cmdfile),
            "chat" => Ok(Category::Chat),
            other => Err(TopicParseError(other.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
#[error("malformed topic {0:?}")]
pub struct TopicParseError(pub String);

/// Bus topic: `{instrument:03}-{category}[-{sub}]`. Build topics through
/// this type so producers and subscribers cannot drift apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic {
    pub instrument: u32,
    pub category: Category,
    pub sub: Option<String>,
}

impl Topic {
    pub fn new(instrument: u32, category: Category, sub: Option<&str>) -> Self {
        Self {
            instrument,
            category,
            sub: sub.map(|s| s.to_string()),
        }
    }

    pub fn file(instrument: u32, name: &str) -> Self {
        Self::new(instrument, Category::File, Some(name))
    }

    pub fn urls(instrument: u32, kind: &str) -> Self {
        Self::new(instrument, Category::Urls, Some(kind))
    }

    #[cfg(test)]
    pub fn chat(instrument: u32) -> Self {
        Self::new(instrument, Category::Chat, None)
    }

    pub fn config_file(name: &str) -> Self {
        Self::file(CONFIG_INSTRUMENT, name)
    }

    /// Prefix matching every topic of one instrument.
    pub fn instrument_prefix(instrument: u32) -> String {
        format!("{:03}-", instrument)
    }

    /// Prefix matching one category of one instrument, with or without a
    /// sub-part.
    pub fn category_prefix(instrument: u32, category: Category) -> String {
        format!("{:03}-{}", instrument, category.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}-{}", self.instrument, self.category.as_str())?;
        if let Some(sub) = &self.sub {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TopicParseError(s.to_string());

        let (instrument, rest) = s.split_once('-').ok_or_else(err)?;
        let instrument = instrument.parse::<u32>().map_err(|_| err())?;

        let (category, sub) = match rest.split_once('-') {
            Some((category, sub)) => (category, Some(sub.to_string())),
            None => (rest, None),
        };

        Ok(Self {
            instrument,
            category: category.parse().map_err(|_| err())?,
            sub,
        })
    }
}
