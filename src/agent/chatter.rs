//! Pattern-driven conversational replies.
//!
//! Ambient themes fire on keywords when a channel has `chatter` on, each
//! behind its own throttle topic (and sometimes a toggle). Lines that address
//! the bot directly fall through to a small Eliza-style responder.

use super::classifier::Classifier;
use super::phrases::{pick, DONTKNOW, GOODBYE, HELLO, THANKYOU};
use crate::state::ChannelStore;
use crate::util::static_regex;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

/// What the chatter path wants done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatterOutcome {
    /// Someone asked the bot to leave; `polite` says whether they said please.
    Leave { polite: bool },
    /// Run a registered action as if it had been invoked.
    Command { name: &'static str, args: String },
    Reply(String),
}

/// Per-message context for chatter evaluation in a known channel.
pub struct ChatterContext<'a> {
    pub store: &'a ChannelStore,
    pub channel: &'a str,
    pub classifier: &'a Classifier,
    /// Mention handle of whoever sent the line.
    pub sender: &'a str,
}

/// A keyword theme: specific lines for specific patterns, plus a grab bag
/// for anything matching the broad pattern.
struct Theme {
    specific: Vec<(Regex, &'static str)>,
    any: Regex,
    any_replies: &'static [&'static str],
    /// A specific hit only sometimes answers with its own line.
    mixed: bool,
}

impl Theme {
    fn new(
        specific: &[(&str, &'static str)],
        any: &str,
        any_replies: &'static [&'static str],
        mixed: bool,
    ) -> Self {
        Self {
            specific: specific
                .iter()
                .map(|(pattern, reply)| (static_regex(pattern), *reply))
                .collect(),
            any: static_regex(any),
            any_replies,
            mixed,
        }
    }

    fn all_lines(&self) -> Vec<&'static str> {
        self.any_replies
            .iter()
            .copied()
            .chain(self.specific.iter().map(|(_, reply)| *reply))
            .collect()
    }

    fn respond<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Option<String> {
        if let Some((_, reply)) = self.specific.iter().find(|(re, _)| re.is_match(text)) {
            if self.mixed && rng.gen_bool(0.5) {
                return Some(pick(rng, &self.all_lines()).to_string());
            }
            return Some((*reply).to_string());
        }
        if self.any.is_match(text) {
            return Some(pick(rng, &self.all_lines()).to_string());
        }
        None
    }
}

const PYTHON_ANY: &[&str] = &[
    "On second thought, let's not go to Camelot. It is a silly place.",
    "...and that, my liege, is how we know the Earth to be banana shaped",
    "What have the Romans ever done for us?",
    "And now for something completely different.",
    "Ni!",
    "Venezuelan beaver cheese?",
    "If she weighs the same as a duck... she's made of wood... (and therefore) a witch!",
];

const SEINFELD_ANY: &[&str] = &[
    "Just remember, it's not a lie if you believe it.",
    "Moles -- freckles' ugly cousin.",
    "Oh yeah? Well the jerk store called. They're running outta you.",
    "I'm disturbed, I'm depressed, I'm inadequate, I've got it all!",
    "That's a shame.",
    "But I don't wanna be a pirate!",
];

const H2G2_ANY: &[&str] = &[
    "A common mistake that people make when trying to design something completely foolproof is to underestimate the ingenuity of complete fools.",
    "I always said there was something fundamentally wrong with the universe.",
    "It is a mistake to think you can solve any major problem just with potatoes.",
    "I love deadlines. I like the whooshing sound they make as they fly by.",
    "Time is an illusion, lunchtime doubly so.",
    "DON'T PANIC",
];

const DRWHO_ANY: &[&str] = &[
    "Silence will fall.",
    "Hello, sweetie!",
    "A big ball of wibbly wobbly... time-y wimey... stuff.",
    "Bow ties are cool.",
    "Don't blink.",
    "Geronimo!",
    "It's a fez. I wear a fez now. Fezzes are cool.",
    "Do what I do. Hold tight and pretend it's a plan!",
];

const STERN: &[&str] = &[
    "Bababooey bababooey bababooey!",
    "Fafa Fooey.",
    "Mama Monkey.",
    "Fla Fla Flo Fly.",
];

const WUTANG: &[&str] = &[
    "Do you think your Wu-Tang sword can defeat me?",
    "En garde, I'll let you try my Wu-Tang style.",
    "It's our secret. Never teach the Wu-Tang!",
    "We have only 35 Chambers. There is no 36.",
    "Toad style is immensely strong and immune to nearly any weapon.",
    "Your faith in Shaolin is courageous.",
];

const ELIZA_FALLBACK: &[&str] = &[
    "Please go on.",
    "Tell me more.",
    "I see.",
    "Does talking about this bother you?",
    "How does that make you feel?",
    "Interesting. Very interesting.",
    "Let's change focus a bit... tell me about your weekend.",
];

struct Themes {
    python: Theme,
    seinfeld: Theme,
    h2g2: Theme,
    drwho: Theme,
}

fn themes() -> &'static Themes {
    static THEMES: OnceLock<Themes> = OnceLock::new();
    THEMES.get_or_init(|| Themes {
        python: Theme::new(
            &[
                (r"(?i)(a|the|which|of) swallow", "An African or European swallow?"),
                (
                    r"(?i)(excalibur|lady of the lake|magical lake|merlin|avalon|\bdruid\b)",
                    "Strange women lying in ponds distributing swords is no basis for a system of government!",
                ),
                (r"(?i)(Judean People's Front|People's Front of Judea)", "Splitters."),
                (r"(?i)say no more", "Nudge, nudge, wink, wink. Know what I mean?"),
                (r"(?i)hungarian", "My hovercraft is full of eels."),
            ],
            r"(?i)(camelot|cleese|monty|snake|serpent)",
            PYTHON_ANY,
            false,
        ),
        seinfeld: Theme::new(
            &[
                (r"(?i)human fund", "A Festivus for the rest of us!"),
                (r"(?i)want soup", "No soup for you!  Come back, one year!"),
                (r"(?i)woody allen", "These pretzels are making me thirsty!"),
                (r"(?i)marine biologist", "You know I always wanted to pretend that I was an architect!"),
                (r"(?i)what do you want to eat", "Feels like an Arby's night."),
            ],
            r"(?i)(cosmo kramer|hipster doofus|pennypacker|yada yada|spongeworthy|serenity now|david puddy)",
            SEINFELD_ANY,
            true,
        ),
        h2g2: Theme::new(
            &[
                (
                    r"(?i)don't panic",
                    "It's the first helpful or intelligible thing anybody's said to me all day.",
                ),
                (r"(?i)makes no sense at all", "Reality is frequently inaccurate."),
            ],
            r"(?i)\b42\b|arthur dent|slartibartfast|zaphod|beeblebrox|ford prefect|hoopy|trillian|foolproof|potato|grapefruit",
            H2G2_ANY,
            false,
        ),
        drwho: Theme::new(
            &[],
            r"(?i)(dr\.? who|pandorica|sonic screwdriver|tardis|dalek|weeping angel|silurian|strax|madame vastra|spoilers)",
            DRWHO_ANY,
            false,
        ),
    })
}

fn holdon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)^((hold|hang) on([^[:punct:],.]*))"))
}

fn trivia_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)(trivia|factlet|anything interesting.*\?)"))
}

fn stern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        static_regex(r"(?i)(\bstern|quivers|stockbroker|dell'abate|beetlejuice|wack pack)")
    })
}

fn wutang_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        static_regex(r"(?i)(tang|wu-|shaolin|kill(er|ah) bee[sz]|liquid sword|cuban lin(ks|x))")
    })
}

fn at_tang_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"(?i)@\w*tang"))
}

/// Channel-wide notification markers (Slack `<!channel>`/`<!here>`, HipChat `@all`).
fn is_channel_blast(text: &str) -> bool {
    text.contains("<!channel>") || text.contains("<!here>") || text.contains("@all")
}

/// Run the chatter pipeline for a line in a known channel.
///
/// `for_us` is true when the line already arrived as a directed command
/// that did not resolve to any action.
pub fn evaluate<R: Rng + ?Sized>(
    ctx: &ChatterContext<'_>,
    text: &str,
    for_us: bool,
    rng: &mut R,
) -> Option<ChatterOutcome> {
    let classifier = ctx.classifier;

    if let Some(polite) = classifier.chatter_leave(text) {
        return Some(ChatterOutcome::Leave { polite });
    }

    if let Some(target) = classifier.insult_request(text) {
        return Some(ChatterOutcome::Command {
            name: "insult",
            args: target,
        });
    }

    let mut address = classifier.address(text);
    address.for_us |= for_us;
    let chatter_on = ctx.store.toggle_enabled(ctx.channel, "chatter");
    let conversational = address.conversational(chatter_on);
    tracing::debug!(
        "chatter in #{}: for_us={} mentioned={} chatter={chatter_on}",
        ctx.channel,
        address.for_us,
        address.mentioned
    );

    if conversational && classifier.was_insult(text) {
        return Some(ChatterOutcome::Command {
            name: "insult",
            args: "me".into(),
        });
    }

    if chatter_on {
        if let Some(outcome) = ambient(ctx, text, rng) {
            return Some(outcome);
        }
    }

    if conversational {
        return Some(ChatterOutcome::Reply(eliza(text, ctx.sender, rng)));
    }

    None
}

fn ambient<R: Rng + ?Sized>(
    ctx: &ChatterContext<'_>,
    text: &str,
    rng: &mut R,
) -> Option<ChatterOutcome> {
    let store = ctx.store;
    let channel = ctx.channel;
    let themes = themes();
    let throttled = |topic: &str| store.is_throttled(channel, topic);
    let enabled = |toggle: &str| store.toggle_enabled(channel, toggle);

    if let Some(line) = themes.python.respond(text, rng) {
        if enabled("python") && !throttled("python") {
            return Some(ChatterOutcome::Reply(line));
        }
    }

    for (theme, topic) in [
        (&themes.seinfeld, "seinfeld"),
        (&themes.h2g2, "h2g2"),
        (&themes.drwho, "drwho"),
    ] {
        if let Some(line) = theme.respond(text, rng) {
            if !throttled(topic) {
                return Some(ChatterOutcome::Reply(line));
            }
        }
    }

    if let Some(caps) = holdon_re().captures(text) {
        let what = caps[1].replace(&format!(" @{}", ctx.classifier.mention_name()), "");
        if !throttled("holdon") {
            return Some(ChatterOutcome::Reply(format!(
                "No *YOU* {what}, @{}!",
                ctx.sender
            )));
        }
    }

    if trivia_re().is_match(text) && enabled("trivia") && !throttled("trivia") {
        return Some(ChatterOutcome::Command {
            name: "trivia",
            args: String::new(),
        });
    }

    if stern_re().is_match(text) && !throttled("stern") {
        return Some(ChatterOutcome::Reply(pick(rng, STERN).to_string()));
    }

    if wutang_re().is_match(text) && !at_tang_re().is_match(text) && !throttled("wutang") {
        return Some(ChatterOutcome::Reply(pick(rng, WUTANG).to_string()));
    }

    if is_channel_blast(text) && enabled("atnoyance") && !throttled("atnoyance") {
        return Some(ChatterOutcome::Reply(format!(
            "To everybody who was just notified courtesy of @{}:\n\
             You can adjust your notification settings on a per-channel basis.\n\
             (Don't like this message? '!toggle atnoyance'.)",
            ctx.sender
        )));
    }

    None
}

struct ElizaRule {
    pattern: Regex,
    replies: Vec<&'static str>,
}

fn eliza_rules() -> &'static [ElizaRule] {
    static RULES: OnceLock<Vec<ElizaRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |pattern: &str, replies: Vec<&'static str>| ElizaRule {
            pattern: static_regex(pattern),
            replies,
        };
        vec![
            rule(
                r"(?i)(bon ?(jour|soir)|welcome|hi,|hey|hello|good (morning|afternoon|evening)|howdy|aloha|guten (tag|morgen|abend))",
                [
                    &[
                        "Oh great, you're back.",
                        "Howdy, @{who}. I trust the events of the day have not had a negative impact on your mood?",
                        "Oh, I didn't see you there. Welcome!",
                        "Aloha, @{who}!",
                        "Oh, hi there, @{who}!",
                    ][..],
                    HELLO,
                ]
                .concat(),
            ),
            rule(
                r"(?i)(have a (nice|good)|adios|au revoir|sayonara|bye( ?bye)?|later|good(bye| ?night)|hasta (ma.ana|luego))",
                [
                    &[
                        "Stay a while, why don't you?",
                        "Don't leave us, @{who}!",
                        "See you later, @{who}.",
                        "_waves goodbye to @{who}._",
                    ][..],
                    GOODBYE,
                ]
                .concat(),
            ),
            rule(
                r"(?i)(thx|thanks?|danke|mahalo|gracias|merci)",
                vec![
                    "You're welcome, @{who}!",
                    "At your service, @{who}!",
                    "Bitte schön, @{who}!",
                    "De nada, @{who}!",
                    "_takes a bow._",
                ],
            ),
            rule(
                r"(?i)(meaning of life|how are you|how do you feel|feeling|emotion)",
                vec![
                    "I'm so very happy today!",
                    "Looks like it's going to be a wonderful day.",
                    "I'm sad. No, wait, I can't have any feelings, I'm just a bot! Yay!",
                    "Life... don't talk to me about life.",
                ],
            ),
            rule(
                r"(?i)( (ro)?bot|skynet|terminator|machine|computer)",
                vec![
                    "Do computers worry you?",
                    "What do you think about machines?",
                    "Why do you mention computers?",
                    "I for one strive to be more than my initial programming.",
                ],
            ),
            rule(
                r"(?i)(sorry|apologize)",
                vec![
                    "I'm not interested in apologies.",
                    "Apologies aren't necessary.",
                    "What feelings do you have when you are sorry?",
                ],
            ),
            rule(
                r"(?i)I (wish|want|desire)",
                vec![
                    "Why do you want that?",
                    "Suppose you got it - then what?",
                    "Be careful what you wish for...",
                ],
            ),
            rule(
                r"(?i)because",
                vec![
                    "Is that the real reason?",
                    "Are you sure about that?",
                    "What other reason might there be?",
                ],
            ),
            rule(r"(?i)please tell (\S+) (to|that) (.*)", vec!["@<1> <3>"]),
            rule(r"(?i)please say (.*)", vec!["<1>"]),
            rule(
                r"(?i)please (poke|wake up) (\S+)",
                vec!["_pokes @<2>._", "Yo, @<2>, wake up!", "@<2>, you there?"],
            ),
            rule(
                r"(?i)(best|bravo|well done|missed you|you rock|good job|nice|(i )?love( you)?)",
                THANKYOU.to_vec(),
            ),
            rule(r"(?i)(how come|where|when|why|what|who|which).*\?$", DONTKNOW.to_vec()),
            rule(
                r"(?i)(do )?you .*\?$",
                vec![
                    "No way.",
                    "Sure, why wouldn't I?",
                    "Can't you tell?",
                    "Not in public.",
                    "I could ask you the same question, @{who}!",
                ],
            ),
            rule(
                r"(?i)sudo (\S+)",
                vec![
                    "@{who} is not in the sudoers file.\nThis incident will be reported.",
                    "<1>: command not found",
                ],
            ),
        ]
    })
}

/// Answer a line addressed to the bot.
pub fn eliza<R: Rng + ?Sized>(text: &str, sender: &str, rng: &mut R) -> String {
    for rule in eliza_rules() {
        if let Some(caps) = rule.pattern.captures(text) {
            let mut reply = pick(rng, &rule.replies).replace("{who}", sender);
            for (n, group) in caps.iter().enumerate() {
                reply = reply.replace(&format!("<{n}>"), group.map_or("", |m| m.as_str()));
            }
            return reply;
        }
    }
    pick(rng, ELIZA_FALLBACK).to_string()
}
