//! Deterministic rotation over the five creative categories.
//!
//! Every generation call gets one category directive injected verbatim into
//! its prompt; rotating per caller keeps consecutive requests from one user
//! visibly different.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryDirective {
    pub slug: &'static str,
    pub note: &'static str,
}

pub const CATEGORY_DIRECTIVES: [CategoryDirective; 5] = [
    CategoryDirective {
        slug: "web-toy",
        note: "CATEGORY: WEB TOY\n\
               Build a small self-contained visual toy: something the visitor pokes, drags or\n\
               clicks purely for the pleasure of watching it react. Particles, springy blobs,\n\
               generative doodles. No score, no goal, no instructions longer than one line.",
    },
    CategoryDirective {
        slug: "utility-tool",
        note: "CATEGORY: UTILITY TOOL\n\
               Build a genuinely usable single-purpose tool: a converter, calculator, timer,\n\
               palette picker or text transformer. It must work entirely client-side, handle\n\
               bad input gracefully, and present its result prominently.",
    },
    CategoryDirective {
        slug: "playable-game",
        note: "CATEGORY: PLAYABLE GAME\n\
               Build a tiny playable game with a clear win or score condition: reaction tests,\n\
               memory pairs, a one-button dodger. Keyboard and touch both work. Keep a visible\n\
               score and a restart control.",
    },
    CategoryDirective {
        slug: "interactive-art",
        note: "CATEGORY: INTERACTIVE ART\n\
               Build an atmospheric interactive artwork: a scene that evolves on its own and\n\
               responds to the pointer. Favor canvas or CSS animation, a strong palette, and\n\
               motion that never fully repeats. No UI chrome beyond the piece itself.",
    },
    CategoryDirective {
        slug: "quiz",
        note: "CATEGORY: QUIZ\n\
               Build a short self-scoring quiz (5-8 questions) on one playful topic. One\n\
               question at a time, instant feedback per answer, and a final result screen\n\
               with a shareable verdict line.",
    },
];

const GLOBAL_KEY: &str = "__global__";
const CURSOR_MAP_MAX: usize = 4096;
const CURSOR_MAP_KEEP: usize = 2048;

/// Round-robin cursor per caller key. Unknown/empty keys share one global
/// cursor. The map is halved when it outgrows its cap, preserving the key
/// being advanced.
#[derive(Debug, Default)]
pub struct CategoryRotator {
    cursors: Mutex<HashMap<String, usize>>,
}

impl CategoryRotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, user_key: &str) -> CategoryDirective {
        let key = if user_key.trim().is_empty() {
            GLOBAL_KEY
        } else {
            user_key
        };

        let mut cursors = self.cursors.lock().unwrap();
        let idx = {
            let entry = cursors.entry(key.to_string()).or_insert(0);
            let idx = *entry % CATEGORY_DIRECTIVES.len();
            *entry = (idx + 1) % CATEGORY_DIRECTIVES.len();
            idx
        };

        if cursors.len() > CURSOR_MAP_MAX {
            let excess = cursors.len() - CURSOR_MAP_KEEP;
            let mut evict: Vec<String> = cursors.keys().filter(|k| *k != key).cloned().collect();
            evict.truncate(excess);
            for k in evict {
                cursors.remove(&k);
            }
        }

        CATEGORY_DIRECTIVES[idx]
    }
}
