use clap::builder::{
	Styles,
	styling::{AnsiColor, Effects},
};

/// Version string stamped with the build's git sha and target triple.
pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	" (",
	env!("VERGEN_GIT_SHA"),
	", ",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
	")",
);

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Magenta.on_default() | Effects::BOLD)
		.usage(AnsiColor::Magenta.on_default() | Effects::BOLD)
		.literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default() | Effects::ITALIC)
}
