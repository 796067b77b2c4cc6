use std::fmt::Write as _;

use bookclub::cache::MemoryStore;
use bookclub::{ContentClient, Enricher};

use clap::Subcommand;
use eyre::eyre;
use log::trace;

#[derive(Subcommand)]
#[non_exhaustive]
pub enum Commands {
    /// Show the current read, or the candidates while voting is open
    Current {
        /// Skip the bibliographic metadata lookup
        #[clap(long)]
        no_enrich: bool,
    },

    /// List the books the club has already read
    Past,

    /// List upcoming events
    Events,

    /// Sign up an email address for the newsletter
    #[clap(arg_required_else_help = true)]
    Subscribe {
        /// Email address to subscribe
        email: String,

        /// Where the signup came from
        #[clap(short, long, default_value = "cli")]
        source: String,
    },
}

impl Commands {
    pub fn execute(self, api: &str) -> eyre::Result<String> {
        let client: ContentClient = ContentClient::new(api, MemoryStore::default());

        match self {
            Commands::Current { no_enrich } => current(&client, no_enrich),
            Commands::Past => past(&client),
            Commands::Events => events(&client),
            Commands::Subscribe { email, source } => {
                trace!("Submitting newsletter signup for '{email}'");
                let ack = client.subscribe(&email, &source, "");
                if ack.ok {
                    Ok(ack.message.unwrap_or_else(|| "Subscribed!".to_owned()))
                } else {
                    Err(eyre!(ack
                        .error
                        .unwrap_or_else(|| "Signup rejected by the endpoint".to_owned())))
                }
            }
        }
    }
}

fn current(client: &ContentClient, no_enrich: bool) -> eyre::Result<String> {
    let current = client.current()?;

    let mut out = String::new();
    if current.voting_open {
        out.push_str("Voting is open!");
        if !current.vote_form_url.is_empty() {
            let _ = write!(out, " Cast your vote: {}", current.vote_form_url);
        }
        out.push('\n');
    }

    if current.books.is_empty() {
        out.push_str("No current selection yet.");
        return Ok(out);
    }

    let enricher: Enricher = Enricher::default();
    for book in &current.books {
        if no_enrich {
            let _ = writeln!(out, "{} by {}", book.title, book.author);
            continue;
        }

        let meta = enricher.enrich(book);
        let _ = writeln!(out, "{} by {}", meta.title, meta.authors.join(", "));
        if !meta.description.is_empty() {
            let _ = writeln!(out, "  {}", meta.description);
        }
        if !meta.subjects.is_empty() {
            let _ = writeln!(out, "  [{}]", meta.subjects.join(", "));
        }
        if !meta.cover_url.is_empty() {
            let _ = writeln!(out, "  cover: {}", meta.cover_url);
        }
    }

    Ok(out.trim_end().to_owned())
}

fn past(client: &ContentClient) -> eyre::Result<String> {
    let reads = client.past()?;
    if reads.is_empty() {
        return Ok("No past reads recorded.".to_owned());
    }

    let mut out = String::new();
    for read in reads {
        let _ = writeln!(out, "[{}] {} by {}", read.month, read.title, read.author);
        if !read.short_blurb.is_empty() {
            let _ = writeln!(out, "  {}", read.short_blurb);
        }
    }

    Ok(out.trim_end().to_owned())
}

fn events(client: &ContentClient) -> eyre::Result<String> {
    let events = client.events()?;
    if events.is_empty() {
        return Ok("No upcoming events.".to_owned());
    }

    let mut out = String::new();
    for event in events {
        let _ = writeln!(out, "{} ({} {})", event.title, event.date, event.time);
        if !event.location.is_empty() {
            let _ = writeln!(out, "  at {}", event.location);
        }
        if !event.description.is_empty() {
            let _ = writeln!(out, "  {}", event.description);
        }
        if !event.rsvp_url.is_empty() {
            let _ = writeln!(out, "  RSVP: {}", event.rsvp_url);
        }
    }

    Ok(out.trim_end().to_owned())
}
