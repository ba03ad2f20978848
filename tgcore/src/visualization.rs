//! Four-symbol fingerprint that users read to each other to detect a
//! man-in-the-middle.

use sha2::{Digest, Sha256};

/// Number of symbols in [`EMOJI_TABLE`].
pub const TABLE_SIZE: usize = 333;

/// Symbol table shared with every peer. Order matters.
pub const EMOJI_TABLE: [&str; TABLE_SIZE] = [
    "😉", "😍", "😛", "😭", "😱", "😡", "😎", "😴", "😵", "😈", "😬", "😇",
    "😏", "👮", "👷", "💂", "👶", "👨", "👩", "👴", "👵", "😻", "😽", "🙀",
    "👺", "🙈", "🙉", "🙊", "💀", "👽", "💩", "🔥", "💥", "💤", "👂", "👀",
    "👃", "👅", "👄", "👍", "👎", "👌", "👊", "✌️", "✋", "👐", "👆", "👇",
    "👉", "👈", "🙏", "👏", "💪", "🚶", "🏃", "💃", "👫", "👪", "👬", "👭",
    "💅", "🎩", "👑", "👒", "👟", "👞", "👠", "👕", "👗", "👖", "👙", "👜",
    "👓", "🎀", "💄", "💛", "💙", "💜", "💚", "💍", "💎", "🐶", "🐺", "🐱",
    "🐭", "🐹", "🐰", "🐸", "🐯", "🐨", "🐻", "🐷", "🐮", "🐗", "🐴", "🐑",
    "🐘", "🐼", "🐧", "🐥", "🐔", "🐍", "🐢", "🐛", "🐝", "🐜", "🐞", "🐌",
    "🐙", "🐚", "🐟", "🐬", "🐋", "🐐", "🐊", "🐫", "🍀", "🌹", "🌻", "🍁",
    "🌾", "🍄", "🌵", "🌴", "🌳", "🌞", "🌚", "🌙", "🌎", "🌋", "⚡️", "☔️",
    "❄️", "⛄️", "🌀", "🌈", "🌊", "🎓", "🎆", "🎃", "👻", "🎅", "🎄", "🎁",
    "🎈", "🔮", "🎥", "📷", "💿", "💻", "☎️", "📡", "📺", "📻", "🔉", "🔔",
    "⏳", "⏰", "⌚", "🔒", "🔑", "🔎", "💡", "🔦", "🔌", "🔋", "🚿", "🚽",
    "🔧", "🔨", "🚪", "🚬", "💣", "🔫", "🔪", "💊", "💉", "💰", "💵", "💳",
    "✉️", "📫", "📦", "📅", "📁", "✂️", "📌", "📎", "✒️", "✏️", "📐", "📚",
    "🔬", "🔭", "🎨", "🎬", "🎤", "🎧", "🎵", "🎹", "🎻", "🎺", "🎸", "👾",
    "🎮", "🃏", "🎲", "🎯", "🏈", "🏀", "⚽️", "⚾️", "🎾", "🎱", "🏉", "🎳",
    "🏁", "🏇", "🏆", "🏊", "🏄", "☕️", "🍼", "🍺", "🍷", "🍴", "🍕", "🍔",
    "🍟", "🍗", "🍱", "🍚", "🍜", "🍡", "🍳", "🍞", "🍩", "🍦", "🎂", "🍰",
    "🍪", "🍫", "🍭", "🍯", "🍎", "🍏", "🍊", "🍋", "🍒", "🍇", "🍉", "🍓",
    "🍑", "🍌", "🍐", "🍍", "🍆", "🍅", "🌽", "🏡", "🏥", "🏦", "⛪️", "🏰",
    "⛺️", "🏭", "🗻", "🗽", "🎠", "🎡", "⛲️", "🎢", "🚢", "🚤", "⚓️", "🚀",
    "✈️", "🚁", "🚂", "🚋", "🚎", "🚌", "🚙", "🚗", "🚕", "🚛", "🚨", "🚔",
    "🚒", "🚑", "🚲", "🚠", "🚜", "🚦", "⚠️", "🚧", "⛽️", "🎰", "🗿", "🎪",
    "🎭", "🇯🇵", "🇰🇷", "🇩🇪", "🇨🇳", "🇺🇸", "🇫🇷", "🇪🇸", "🇮🇹", "🇷🇺", "🇬🇧", "1️⃣",
    "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "0️⃣", "🔟", "❗️", "❓️",
    "♥️", "♦️", "💯", "🔗", "🔱", "🔴", "🔵", "🔶", "🔷",
];

/// Indices into [`EMOJI_TABLE`] for a shared secret.
///
/// `initiator_public` must be the caller's `g_a` in its 256-byte wire form on
/// both sides, otherwise the peers see different symbols.
pub fn derive(shared_secret: &[u8], initiator_public: &[u8]) -> [usize; 4] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update(initiator_public);
    let digest = hasher.finalize();

    let mut indices = [0usize; 4];
    for (index, chunk) in indices.iter_mut().zip(digest.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        bytes[0] &= 0x7f;
        *index = (u64::from_be_bytes(bytes) % TABLE_SIZE as u64) as usize;
    }
    indices
}

pub fn emojis(indices: [usize; 4]) -> [&'static str; 4] {
    indices.map(|i| EMOJI_TABLE[i % TABLE_SIZE])
}
