// DASH SegmentTemplate identifier substitution ($RepresentationID$, $Number$, ...).

use std::sync::LazyLock;

use regex::{Captures, Regex};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)?(?:%0(\d+)d)?\$")
        .expect("valid template regex")
});

#[derive(Debug, Clone, Copy)]
pub(crate) struct TemplateContext<'a> {
    pub representation_id: &'a str,
    pub number: u64,
    pub time: u64,
    pub bandwidth: Option<u64>,
}

pub(crate) fn expand(pattern: &str, ctx: &TemplateContext<'_>) -> String {
    IDENTIFIER
        .replace_all(pattern, |caps: &Captures<'_>| {
            let width = caps
                .get(2)
                .and_then(|w| w.as_str().parse::<usize>().ok())
                .unwrap_or(0);
            let number = match caps.get(1).map(|m| m.as_str()) {
                // `$$` is an escaped dollar sign.
                None => return "$".to_owned(),
                Some("RepresentationID") => return ctx.representation_id.to_owned(),
                Some("Number") => ctx.number,
                Some("Time") => ctx.time,
                Some(_) => match ctx.bandwidth {
                    Some(bandwidth) => bandwidth,
                    None => return caps[0].to_owned(),
                },
            };
            format!("{number:0width$}")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext<'static> {
        TemplateContext {
            representation_id: "video=1",
            number: 7,
            time: 90_000,
            bandwidth: Some(800_000),
        }
    }

    #[test]
    fn substitutes_identifiers() {
        assert_eq!(
            expand("$RepresentationID$/seg-$Number$.m4s", &ctx()),
            "video=1/seg-7.m4s"
        );
        assert_eq!(expand("t-$Time$-$Bandwidth$", &ctx()), "t-90000-800000");
    }

    #[test]
    fn honours_width_and_escapes() {
        assert_eq!(expand("seg$Number%05d$.ts", &ctx()), "seg00007.ts");
        assert_eq!(expand("cost$$.ts", &ctx()), "cost$.ts");
    }

    #[test]
    fn leaves_unknown_bandwidth_untouched() {
        let ctx = TemplateContext {
            bandwidth: None,
            ..ctx()
        };
        assert_eq!(expand("b-$Bandwidth$", &ctx), "b-$Bandwidth$");
    }
}
