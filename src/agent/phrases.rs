//! Canned lines the bot picks from at random.

use rand::seq::SliceRandom;
use rand::Rng;

pub const HELLO: &[&str] = &[
    "A good day to you!",
    "Aloha, friends!",
    "And a good day to you, m'lady!",
    "Guten Tag!",
    "Hey now! What up, dawg?",
    "Hiya, honey.",
    "How do you do?",
    "Howdy, partner(s)!",
    "Huh? What? I'm awake! Who said that?",
    "Oh, you again.",
    "Sup?",
    "Well, hello there!",
    "Yo yo yo! Good to see you!",
    "_gives you the side-eye._",
    "_wakes up._",
    "_yawns._",
];

pub const GOODBYE: &[&str] = &[
    "*waves goodbye*",
    "Adios! Ciao! Sayonara!",
    "Au revoir!",
    "Au revoir, mes amis.",
    "Buh-bye!",
    "Bye now - I'll be here if you need me.",
    "Farewell, my friends.",
    "Good night and good luck.",
    "Goodbye...",
    "Hasta la vista, baby.",
    "I'll never forget you.",
    "Later.",
    "Peace out.",
    "Qapla'!",
    "See y'all at the restaurant at the end of the universe.",
    "See you later, alligator.",
    "So long, see you soon.",
    "Toodle-Ooos.",
    "You're leaving so soon?",
    "[extreme Arnold voice] I'll be back.",
];

pub const THANKYOU: &[&str] = &[
    "Always happy to help.",
    "Glad to be of service.",
    "I appreciate your appreciation.",
    "Thank you!",
    "Thanks - this channel is my life!",
    "_blushes._",
    "_grins sheepishly._",
    "_nods approvingly._",
    "_takes a bow._",
];

pub const DONTKNOW: &[&str] = &[
    "How the hell am I supposed to know that?",
    "FIIK",
    "ENOCLUE",
    "Buh?",
    "I have no idea.",
    "Sorry, I wouldn't know about that.",
    "I wouldn't tell you even if I knew.",
    "Oh, uhm, ...I don't know. Do you?",
    "I could tell you, but then I'd have to kill you.",
    "Wouldn't you like to know.",
    "I'm sorry, that's classified.",
    "The answer lies within yourself.",
    "Ask more politely, and I may tell you.",
    "wat",
    "Why are you asking *me*?",
];

/// Replies to a bare invocation such as `!` or `@bot`.
pub const BARE_INVOCATION: &[&str] = &[
    "Yes?",
    "Yeeeeees?",
    "How can I help you?",
    "You sound like you need help. Call a friend.",
    "What do you want?",
    "I can't help you unless you tell me what you want.",
    "Go on, don't be shy, ask me something.",
    "At your service!",
    "Ready to serve!",
    "Uhuh, sure.",
    "_looks at you expectantly._",
    "_chuckles._",
    "Go on...",
    "?",
];

pub const ACKNOWLEDGE: &[&str] = &[
    "Okiley, dokiley!",
    "Sure thing, my friend!",
    "Done.",
    "No problemo.",
    "_throttles that thang._",
    "Got it.",
    "Word.",
    "Unthrottled to the max!",
    "Consider it done.",
];

/// Pick one line. Empty tables yield an empty string.
pub fn pick<'a, R: Rng + ?Sized>(rng: &mut R, lines: &[&'a str]) -> &'a str {
    lines.choose(rng).copied().unwrap_or_default()
}

/// Pick one line using the thread-local generator.
pub fn random(lines: &[&'static str]) -> &'static str {
    pick(&mut rand::thread_rng(), lines)
}
