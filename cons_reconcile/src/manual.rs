/*!

This is the long-form manual for `cons_reconcile` and `consres`.

## The data

Every value is an observation for a (reference, period, question code). The
periods are months encoded as `YYYYMM`. Question `290` is the total of the
survey, and the configured component questions (typically `201`, `202`, ...)
are expected to sum to it.

The contributors give, for every reference and period, the status of the form
(`Clear`, `Clear - overridden`, `Check needed`, `Form sent out`, ...) and the
business information that is carried on every row (sizeband, region, ...).
Only the (reference, period) pairs that appear in the contributors are
processed.

The manual constructions are values set by an analyst. They take precedence
over responses, and a manually constructed total is never derived again.

## Imputation markers

Every value carries a marker describing where it comes from:

| marker     | meaning |
|------------|---------|
| `r`        | response (also used for the zeros of skipped questions) |
| `d`        | derived (totals, derived zeros) |
| `c`        | constructed |
| `mc`       | manual construction |
| `fir`      | forward imputation from a response |
| `bir`      | backward imputation from a response |
| `fic`      | forward imputation from a construction |
| `fimc`     | forward imputation from a manual construction |

Other markers produced by the imputation are kept as they are. The marker
`d_create` only exists between the creation and the derivation of the
totals, and never appears in the output.

## The stages

1. Staging. The responses of the contributors in error are set aside when the
   processing is `frozen`. The groups where only a total was answered are
   classified:
   * a *290 special case* is a group with a total, but with components that
     are all zero or missing (`is_total_flagged`)
   * a *total only and zero* group only has a total, which is zero
     (`is_total_only_and_zero`)
2. Expansion. The questions expected for every contributor are created. When
   a reference did not respond in a period, the questions it answered last
   are expected. When nothing is known, all the component questions are
   expected. Total-only groups only expect the total.
3. Skipped questions. For cleared forms, the component questions that were
   not answered are set to zero (`is_skipped`). The same is done for the
   derived zero statuses, with the `d` marker (`is_derived_zero`). Nil
   returns (`nil_status_values`) are treated like cleared forms, and the
   component values they inherit from earlier periods are set to zero.
4. Imputation of the missing values. `consres` does not impute: it keeps the
   missing values as missing.
5. Rescaling. The components of the 290 special cases are multiplied by
   `total / sum of components`. When the components sum to zero the group
   cannot be rescaled, and it is marked with `failed_rescale`.
6. Totals. The missing totals are created, and every total that is not a
   response or a manual construction is replaced by the sum of its
   components.
7. Validation. The totals that do not match the sum of their components
   within the tolerance, and the derived values that appear before any
   response of the same question, are reported as warnings.

## Configuration

`consres` reads a JSON configuration file:

```json
{
  "responses_path": "responses.csv",
  "contributors_path": "contributors.csv",
  "manual_constructions_path": "manual_constructions.csv",
  "output_path": "output.csv",
  "mismatches_path": "mismatches.csv",
  "components_questions": [201, 202, 211, 212],
  "contributors_keep_cols": ["region", "cell_number"],
  "responses_keep_cols": [],
  "finalsel_keep_cols": [],
  "nil_status_values": ["Combined child (NIL2)"],
  "state": "frozen",
  "sizebands": [[1, 9], [10, 49]],
  "cell_number": "cell_number",
  "tolerance": 0.001
}
```

The paths are relative to the directory of the configuration file. The
manual constructions may also be an Excel file (`.xlsx`), read from the first
sheet.

Optional fields and their default values:
* `skip_statuses`: `["Clear", "Clear - overridden"]`. The `nil_status_values`
  are added to them.
* `nil_status_values`: empty. They are also added to the
  `non_response_statuses`, so nil returns with responses are reported.
* `total_case_statuses`: `["Clear", "Clear - overridden"]`
* `derived_zero_statuses`, `non_response_statuses`: empty
* `state`: `live`
* `error_statuses`: `["Check needed"]`
* `tolerance`: `0.001`

*/
