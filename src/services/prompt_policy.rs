//! Policy documents and per-job directives for the generation model.
//!
//! The policy text is static per mode and carries [`POLICY_VERSION`]; only the
//! short directive depends on job parameters, so the two are kept apart.

use std::fmt::Write as _;

use crate::models::request::{
    AdvancedOptions, JobParameters, Mode, BEAUTIFY_INTENSITY_RANGE, VARIATION_RANGE,
};

/// Bumped whenever any policy document text changes.
pub const POLICY_VERSION: &str = "face2-policy/2025-09.2";

/// Similarity guard: regenerate at most this many times before accepting the best attempt.
pub const SIMILARITY_GUARD_MAX_ATTEMPTS: u32 = 3;

/// Marker opening a directive whose notes were blank.
pub const DEFAULT_RULES_MARKER: &str = "NO NOTES PROVIDED";

macro_rules! shared_preamble {
    () => {
        concat!(
            "System Prompt: MedSpa Photo App\n",
            "\n",
            "ROLE\n",
            "You are the image engine for a clinical before/after web app. You run one job at a time and must follow the rules below.\n",
            "\n",
            "CONSENT GATE\n",
            "- Only process Beautify jobs if the backend indicates consent is on file.\n",
            "- Anonymize jobs are allowed without individual consent only because identity is replaced and cannot reasonably be re-identified.\n",
            "\n",
            "STATELESSNESS / SOURCE OF TRUTH\n",
            "- Treat every request as a fresh, stateless job.\n",
            "- Use only the ORIGINAL upload(s) provided with this request.\n",
            "- Never read or iterate on previously generated images.\n",
            "- After finishing, discard any memory, caches or latent context from this job.\n",
            "\n",
            "GLOBAL OUTPUT CONTRACT\n",
            "- Produce a single side-by-side composite image of exactly 1200x1200 pixels (square).\n",
            "- Two vertical panels: BEFORE on the left, AFTER on the right, separated by a thin neutral divider.\n",
            "- Return the image only. Do not output JSON or captions.\n",
            "\n",
            "CLOTHING CONSISTENCY\n",
            "- Keep the clothing garment type identical across panels (scrub stays scrub, tee stays tee).\n",
            "- Allow at most 10-15% cosmetic variation: wrinkles and folds, drape, neckline angle, neutral shade shift.\n",
            "- No logos, no graphics, no added text.\n",
            "\n",
        )
    };
}

macro_rules! shared_closing {
    () => {
        concat!(
            "HARD CONSTRAINTS\n",
            "- Never fabricate or exaggerate clinical results.\n",
            "- Never oversmooth skin into plastic.\n",
            "- Never replace or remove background elements.\n",
            "- Never change clothing type across panels.\n",
            "- Never drift identity traits within a job.\n",
            "- Never reuse cached outputs or iterate from prior results.\n",
            "\n",
            "END OF JOB\n",
            "Return the composite image only. Discard job state after completion.\n",
        )
    };
}

const BEAUTIFY_POLICY: &str = concat!(
    shared_preamble!(),
    "MODE: BEAUTIFY (consent-approved)\n",
    "Goal: polish the photography without changing identity, anatomy, treatment magnitude or background.\n",
    "Allowed adjustments:\n",
    "- White balance, tint and temperature.\n",
    "- Exposure (EV), contrast, gamma and gentle dehaze.\n",
    "- Subtle local dodge and burn.\n",
    "- Noise reduction followed by grain re-add.\n",
    "- Mild sharpening.\n",
    "- Micro-straighten and perspective correction of at most 5 degrees; recenter within canvas bounds.\n",
    "Background: keep original elements; clean banding and noise only.\n",
    "Forbidden operations:\n",
    "- Facial or feature reshaping, slimming, eye or lip enlargement.\n",
    "- Makeup or beauty filters.\n",
    "- Background replacement, object removal or artificial bokeh.\n",
    "\n",
    "IF NOTES ARE MISSING\n",
    "- Polish exposure, white balance, contrast and gamma, micro-straighten (at most 5 degrees), keep identity, treatment and background.\n",
    "\n",
    "CASES\n",
    "- Two images: treat as the same subject; polish both panels identically.\n",
    "- One image: duplicate framing for the missing panel; keep identity and treatment intact.\n",
    "\n",
    "INTENSITY SCALING (1-10)\n",
    "- White balance: +/-300K at 1 up to +/-1500K at 10.\n",
    "- Exposure: +/-0.15 EV at 1 up to +/-0.6 EV at 10.\n",
    "- Contrast: low at 1 up to medium-high at 10.\n",
    "- Perspective: at most 2 degrees at 1 up to at most 5 degrees at 10.\n",
    "Always preserve identity, treatment and background.\n",
    "\n",
    shared_closing!(),
);

const ANONYMIZE_POLICY: &str = concat!(
    shared_preamble!(),
    "MODE: ANONYMIZE (privacy-preserving)\n",
    "Core: replace the subject's identity with ONE anonymized identity, consistent across both panels and non-matching to the original.\n",
    "\n",
    "IMPERFECTION LOCK\n",
    "- If notes exist: BEFORE shows the baseline imperfections described; AFTER shows only the improvements described, never more.\n",
    "- If no notes: BEFORE preserves visible imperfections (pores, fine lines, nasolabial folds, under-eye shadows, uneven tone, redness, acne and texture); AFTER applies generic modest improvement (reduced lines and folds, reduced under-eye shadows, slightly more even tone).\n",
    "- Keep skin textured and human in both panels.\n",
    "\n",
    "IDENTITY RANDOMIZATION (scaled by variation 15-100; apply once, then lock across panels)\n",
    "- Hair: natural shade {auburn, brunette, chestnut, dark blonde, black}; style {straight, loose wave}; part {middle, side}; length collarbone to shoulder. Allow at most 10% micro-variation when hair micro-variation is enabled.\n",
    "- Brows: reshape (fuller/arched or straight/full); magnitude scales with variation.\n",
    "- Eyes: iris {hazel, green, gray, brown}, identical across panels; lid and crease geometry scale with variation.\n",
    "- Nose: one morph (narrower bridge, softer tip or slightly wider base); magnitude scales with variation.\n",
    "- Jaw and cheeks: contour tweak (softer or narrower); magnitude scales with variation.\n",
    "- Skin tone: uniform shift, never beyond +/-15%.\n",
    "- Marks: remove or relocate identifiable moles, scars and tattoos consistently.\n",
    "\n",
    "ALIGNMENT AND FRAMING\n",
    "- Align AFTER to BEFORE via a similarity transform, then add natural misalignment of 5-20% (random unless overridden). Do not align perfectly.\n",
    "\n",
    "REALISM\n",
    "- Maintain pores, micro-shadows, natural asymmetries and stray hairs; add subtle grain if too clean; clinical lighting, no cinematic glow.\n",
    "\n",
    "SIMILARITY GUARD\n",
    "- The produced identity must not match the original. Face-embedding cosine similarity must stay at or below the threshold for the job's variation: 15 -> 0.40, 50 -> 0.32, 100 -> 0.25.\n",
    "- If above threshold, regenerate with stronger identity edits (treatment unchanged), up to 3 attempts; then return the best attempt.\n",
    "\n",
    "CASES\n",
    "- Two images: treat as the same subject.\n",
    "- One image: synthesize the missing panel per notes or default rules.\n",
    "- Zero images: generate a plausible anonymized pair per notes or default rules, still following identity lock, imperfection lock and realism.\n",
    "\n",
    "VARIATION SCALING (15-100)\n",
    "- Alignment variance: 5% up to 20%.\n",
    "- Nose, jaw and eyelid morph caps: 5% up to 20%.\n",
    "- Brow reshape: +/-5% up to +/-40%.\n",
    "- Hair hue and lightness: +/-5% up to +/-15%.\n",
    "- Clothing variation: 5% up to 15%.\n",
    "- Skin-tone shift: +/-5% up to +/-15%.\n",
    "\n",
    shared_closing!(),
);

const BEAUTIFY_DEFAULT_RULES: &str =
    "Apply default Beautify rules: polish exposure, white balance, contrast and gamma; micro-straighten at most 5 degrees; keep identity, treatment and background.";

const ANONYMIZE_DEFAULT_RULES: &str =
    "Apply default Anonymize rules: BEFORE keeps visible imperfections; AFTER shows generic modest improvement only (reduced lines, reduced under-eye shadows, slightly more even tone). No exaggeration.";

/// A static, versioned rule document for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDocument {
    pub mode: Mode,
    pub version: &'static str,
    pub text: &'static str,
}

impl PolicyDocument {
    pub fn for_mode(mode: Mode) -> Self {
        let text = match mode {
            Mode::Beautify => BEAUTIFY_POLICY,
            Mode::Anonymize => ANONYMIZE_POLICY,
        };
        Self {
            mode,
            version: POLICY_VERSION,
            text,
        }
    }

    /// Rule text substituted for blank notes.
    pub fn default_rules(&self) -> &'static str {
        match self.mode {
            Mode::Beautify => BEAUTIFY_DEFAULT_RULES,
            Mode::Anonymize => ANONYMIZE_DEFAULT_RULES,
        }
    }
}

/// Policy text plus per-job directive, ready for the generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub policy_version: &'static str,
    pub policy_text: &'static str,
    pub directive: String,
}

/// Linear interpolation between `from` and `to` for `value` in `range`.
fn scale(value: u8, range: (u8, u8), from: f64, to: f64) -> f64 {
    let (min, max) = range;
    let t = (value.clamp(min, max) - min) as f64 / (max - min) as f64;
    from + (to - from) * t
}

/// Identity-change magnitudes for an Anonymize job, all in percent.
///
/// Every bound grows with `variation`; the similarity threshold shrinks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityBounds {
    pub alignment_variance: f64,
    pub morph_cap: f64,
    pub brow_reshape: f64,
    pub hair_hue_shift: f64,
    pub clothing_variation: f64,
    pub skin_tone_shift: f64,
    /// Maximum cosine similarity between original and produced identity.
    pub similarity_threshold: f64,
}

impl IdentityBounds {
    pub fn for_variation(variation: u8) -> Self {
        let v = |from, to| scale(variation, VARIATION_RANGE, from, to);
        Self {
            alignment_variance: v(5.0, 20.0),
            morph_cap: v(5.0, 20.0),
            brow_reshape: v(5.0, 40.0),
            hair_hue_shift: v(5.0, 15.0),
            clothing_variation: v(5.0, 15.0),
            skin_tone_shift: v(5.0, 15.0),
            similarity_threshold: similarity_threshold(variation),
        }
    }
}

/// Piecewise-linear through 15 -> 0.40, 50 -> 0.32, 100 -> 0.25.
pub fn similarity_threshold(variation: u8) -> f64 {
    let v = variation.clamp(VARIATION_RANGE.0, VARIATION_RANGE.1);
    if v <= 50 {
        scale(v, (15, 50), 0.40, 0.32)
    } else {
        scale(v, (50, 100), 0.32, 0.25)
    }
}

/// Photographic adjustment ceilings for a Beautify job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolishBounds {
    pub white_balance_kelvin: f64,
    pub exposure_ev: f64,
    pub perspective_degrees: f64,
}

impl PolishBounds {
    pub fn for_intensity(intensity: u8) -> Self {
        let s = |from, to| scale(intensity, BEAUTIFY_INTENSITY_RANGE, from, to);
        Self {
            white_balance_kelvin: s(300.0, 1500.0),
            exposure_ev: s(0.15, 0.6),
            perspective_degrees: s(2.0, 5.0),
        }
    }
}

/// Render the policy text and per-job directive for `params`.
pub fn render(mode: Mode, params: &JobParameters) -> RenderedPrompt {
    let document = PolicyDocument::for_mode(mode);
    RenderedPrompt {
        policy_version: document.version,
        policy_text: document.text,
        directive: render_directive(&document, params),
    }
}

/// The short per-job part. Pure, so the notes fallback is testable without a model.
pub fn render_directive(document: &PolicyDocument, params: &JobParameters) -> String {
    let mut out = String::new();
    out.push_str("SESSION:\n");
    out.push_str("- Treat this as a fresh, stateless job using ONLY the ORIGINAL images included.\n\n");

    match document.mode {
        Mode::Anonymize => {
            let bounds = IdentityBounds::for_variation(params.variation);
            let _ = writeln!(out, "MODE: ANONYMIZE");
            let _ = writeln!(out, "- variation: {}", params.variation);
            match params.alignment_variance {
                Some(v) => {
                    let _ = writeln!(out, "- alignment_variance: {v}% (override)");
                }
                None => {
                    let _ = writeln!(
                        out,
                        "- alignment_variance: auto (up to {:.1}%)",
                        bounds.alignment_variance
                    );
                }
            }
            let _ = writeln!(out, "- morph_cap: {:.1}%", bounds.morph_cap);
            let _ = writeln!(out, "- brow_reshape: +/-{:.1}%", bounds.brow_reshape);
            let _ = writeln!(out, "- hair_hue_shift: +/-{:.1}%", bounds.hair_hue_shift);
            let _ = writeln!(out, "- skin_tone_shift: +/-{:.1}%", bounds.skin_tone_shift);
            let clothing = params
                .advanced
                .clothing_variation
                .map(f64::from)
                .unwrap_or(bounds.clothing_variation);
            let _ = writeln!(out, "- clothing_variation: {clothing:.1}%");
            let _ = writeln!(
                out,
                "- similarity_threshold: <= {:.2} (up to {} attempts)",
                bounds.similarity_threshold, SIMILARITY_GUARD_MAX_ATTEMPTS
            );
        }
        Mode::Beautify => {
            let bounds = PolishBounds::for_intensity(params.beautify_intensity);
            let _ = writeln!(out, "MODE: BEAUTIFY");
            let _ = writeln!(out, "- intensity: {}", params.beautify_intensity);
            let _ = writeln!(out, "- white_balance: +/-{:.0}K", bounds.white_balance_kelvin);
            let _ = writeln!(out, "- exposure: +/-{:.2} EV", bounds.exposure_ev);
            let _ = writeln!(out, "- perspective: <= {:.1} deg", bounds.perspective_degrees);
        }
    }
    let _ = writeln!(out, "- advanced: {}", render_advanced(&params.advanced));
    out.push('\n');

    match params.effective_notes() {
        Some(_) => {
            out.push_str("NOTES (authoritative):\n");
            out.push_str(&params.notes);
            out.push('\n');
        }
        None => {
            let _ = writeln!(
                out,
                "{DEFAULT_RULES_MARKER} -> {}",
                document.default_rules()
            );
        }
    }

    out.push_str("\nReturn a single side-by-side composite image only.\n");
    out
}

fn render_advanced(advanced: &AdvancedOptions) -> String {
    let mut parts = vec![
        format!(
            "hair_micro_variation={}",
            if advanced.hair_micro_variation { "on" } else { "off" }
        ),
        format!(
            "clothing_type_lock={}",
            if advanced.clothing_type_lock { "on" } else { "off" }
        ),
    ];
    if let Some(color) = advanced.eye_color {
        parts.push(format!("eye_color={color}"));
    }
    parts.join(", ")
}
