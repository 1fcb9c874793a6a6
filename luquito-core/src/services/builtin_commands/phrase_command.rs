//! `!frase`, `!frasetts` and `!jogo`: random sentences and a random
//! "Playing ..." presence.

use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::info;

use crate::Error;
use crate::services::command_service::{CommandContext, CommandReply};

const SUBJECTS: &[&str] = &[
    "O Luquito",
    "A vizinha",
    "Meu primo",
    "O gato do servidor",
    "Um pato",
    "A professora",
    "O estagiário",
];

const VERBS: &[&str] = &[
    "comeu",
    "esqueceu",
    "vendeu",
    "escondeu",
    "quebrou",
    "encontrou",
    "desenhou",
];

const OBJECTS: &[&str] = &[
    "o controle remoto",
    "uma pizza inteira",
    "o teclado mecânico",
    "a senha do wifi",
    "um sapato velho",
    "o último pão de queijo",
];

const ENDINGS: &[&str] = &[
    "ontem à noite",
    "no meio da call",
    "sem pedir desculpa",
    "durante a ranked",
    "e ninguém viu",
    "de novo",
];

const GAMES: &[&str] = &[
    "Counter-Strike",
    "Minecraft",
    "Truco",
    "Paciência",
    "Campo Minado",
    "Stardew Valley",
    "Dota 2",
    "Rocket League",
];

fn pick<R: Rng + ?Sized>(words: &[&'static str], rng: &mut R) -> &'static str {
    words.choose(rng).copied().unwrap_or_default()
}

pub fn generate_phrase<R: Rng + ?Sized>(rng: &mut R) -> String {
    let subject = pick(SUBJECTS, rng);
    let verb = pick(VERBS, rng);
    let object = pick(OBJECTS, rng);
    if rng.random_bool(0.5) {
        format!("{subject} {verb} {object} {}.", pick(ENDINGS, rng))
    } else {
        format!("{subject} {verb} {object}.")
    }
}

pub fn generate_game<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    pick(GAMES, rng)
}

pub fn handle_phrase(tts: bool) -> CommandReply {
    let phrase = generate_phrase(&mut rand::rng());
    if tts {
        CommandReply::tts(phrase)
    } else {
        CommandReply::text(phrase)
    }
}

pub async fn handle_game(ctx: &CommandContext<'_>) -> Result<Option<CommandReply>, Error> {
    let game = generate_game(&mut rand::rng());
    info!("Changing presence to 'Playing {game}'");
    ctx.gateway.set_game(game).await?;
    Ok(None)
}
